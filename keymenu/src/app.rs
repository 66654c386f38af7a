//! The module for the process-wide application context.

use std::sync::Arc;
use log::{debug, info};
use keymenu_gpio::keypad::KeypadMatrix;
use keymenu_gpio::rtc::RtcDriver;
use crate::config::Config;
use crate::debounce::ButtonDebouncer;
use crate::display::Display;
use crate::error::KeymenuError;
use crate::events::{Dispatcher, Event, EventFlags};
use crate::menu::MenuEngine;
use crate::timer::TimerService;

/// Everything the polling loop works on.
#[derive(Debug)]
pub struct App {
    timers: Arc<TimerService>,
    /// Raised by interrupt-side producers, drained by [App::poll].
    events: Arc<EventFlags>,
    debouncer: Arc<ButtonDebouncer>,
    menu: MenuEngine,
    dispatcher: Dispatcher<App>,
}

impl App {
    /// Initializes the display, registers the keypad and menu timers and shows the home screen.
    ///
    /// The timer service must already be ticking, as the display's power-on delays wait on it.
    pub fn new(
        config: &Config,
        timers: Arc<TimerService>,
        events: Arc<EventFlags>,
        mut display: Box<dyn Display>,
        rtc: Box<dyn RtcDriver>,
        matrix: Box<dyn KeypadMatrix>,
    ) -> Result<Self, KeymenuError> {
        config.validate()?;
        display.initialize()?;

        let ready = events.clone();
        let debouncer = ButtonDebouncer::new(&timers, matrix, config.debounce_ticks, move || {
            ready.raise(Event::ButtonsReady)
        })?;
        debug!("{:?} initialized.", debouncer);

        let mut menu = MenuEngine::new(
            display,
            rtc,
            timers.clone(),
            events.clone(),
            &config.password,
            config.multi_tap_timeout_ticks,
        )?;
        menu.set_submit_listener(|node, _| info!("Menu {:?} submitted.", node));

        let dispatcher = Dispatcher::<App>::new()
            .bind(Event::ButtonsReady, App::buttons_ready)
            .bind(Event::RtcSecond, App::rtc_second)
            .bind(Event::MultiTapTimeout, App::multi_tap_timeout);

        Ok(App {
            timers,
            events,
            debouncer: Arc::new(debouncer),
            menu,
            dispatcher,
        })
    }

    fn buttons_ready(&mut self) {
        let pressed = self.debouncer.take_pressed();
        self.menu.button_pressed(pressed);
    }

    fn rtc_second(&mut self) {
        self.menu.update_date_time();
    }

    fn multi_tap_timeout(&mut self) {
        self.menu.multi_tap_timeout();
    }

    /// Handles every pending event once. Returns the number of handlers run.
    pub fn poll(&mut self) -> usize {
        let dispatcher = self.dispatcher;
        let events = self.events.clone();
        dispatcher.poll(&events, self)
    }

    pub fn menu(&self) -> &MenuEngine {
        &self.menu
    }

    /// Gets the entry points for interrupt-side producers.
    pub fn interrupt_lines(&self) -> InterruptLines {
        InterruptLines {
            timers: self.timers.clone(),
            events: self.events.clone(),
            debouncer: self.debouncer.clone(),
        }
    }
}

/// The interrupt handlers. They only arm timers and raise event flags.
#[derive(Debug, Clone)]
pub struct InterruptLines {
    timers: Arc<TimerService>,
    events: Arc<EventFlags>,
    debouncer: Arc<ButtonDebouncer>,
}

impl InterruptLines {
    /// Periodic tick.
    pub fn timer_tick(&self) {
        self.timers.tick();
    }

    /// Falling edge on a keypad row.
    pub fn keypad_row_edge(&self, row: usize) {
        self.debouncer.on_row_edge(&self.timers, row);
    }

    /// RTC one-second wake-up.
    pub fn rtc_wakeup(&self) {
        self.events.raise(Event::RtcSecond);
    }
}
