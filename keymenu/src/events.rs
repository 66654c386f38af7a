//! Event flag word and its polling dispatcher.
//!
//! Interrupt-side producers only ever set bits; the main loop is the only place bits are cleared.
//! Each event owns one bit and lower bits are serviced first.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use log::{trace, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Event {
    /// A keypad scan finished and the pressed-button accumulator holds new bits.
    ButtonsReady = 0,
    /// The RTC one-second wake-up.
    RtcSecond = 1,
    /// The multi-tap repeat window closed without another press.
    MultiTapTimeout = 2,
}

impl Event {
    /// Every event, in service order.
    pub const ALL: [Event; 3] = [Event::ButtonsReady, Event::RtcSecond, Event::MultiTapTimeout];

    pub fn bit(self) -> u32 {
        1 << self as u8
    }
}

/// The shared flag word.
#[derive(Default)]
pub struct EventFlags(AtomicU32);

impl Debug for EventFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventFlags({:#034b})", self.pending())
    }
}

impl EventFlags {
    pub const fn new() -> Self {
        EventFlags(AtomicU32::new(0))
    }

    /// Marks an event as pending. Raising a pending event again has no further effect.
    pub fn raise(&self, event: Event) {
        self.0.fetch_or(event.bit(), Ordering::SeqCst);
    }

    pub fn is_pending(&self, event: Event) -> bool {
        self.pending() & event.bit() != 0
    }

    /// Gets the whole flag word.
    pub fn pending(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears one event, leaving every other bit as it is.
    fn acknowledge(&self, event: Event) {
        self.0.fetch_and(!event.bit(), Ordering::SeqCst);
    }
}

pub type EventHandler<C> = fn(&mut C);

/// Binds events to handlers running on a context object `C`.
pub struct Dispatcher<C> {
    handlers: [Option<EventHandler<C>>; Event::ALL.len()],
}

// Not derived, as that would require `C: Clone`
impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Dispatcher<C> {}

impl<C> Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let bound: Vec<Event> = Event::ALL
            .into_iter()
            .filter(|event| self.handlers[*event as usize].is_some())
            .collect();
        write!(f, "Dispatcher({:?})", bound)
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    pub const fn new() -> Self {
        Dispatcher { handlers: [None; Event::ALL.len()] }
    }

    pub fn bind(mut self, event: Event, handler: EventHandler<C>) -> Self {
        self.handlers[event as usize] = Some(handler);
        self
    }

    /// Runs one pass over the flag word.
    ///
    /// Every pending event is acknowledged right before its handler runs, so a producer raising
    /// the same event while the handler is busy leaves it pending for the next pass. Returns the
    /// number of handlers run.
    pub fn poll(&self, flags: &EventFlags, context: &mut C) -> usize {
        if flags.pending() == 0 {
            return 0;
        }

        let mut handled = 0;
        for event in Event::ALL {
            if !flags.is_pending(event) {
                continue;
            }
            flags.acknowledge(event);
            match self.handlers[event as usize] {
                Some(handler) => {
                    trace!("Dispatching {:?}.", event);
                    handler(context);
                    handled += 1;
                }
                None => warn!("Dropping {:?}, no handler bound.", event),
            }
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<Event>,
        flags: Arc<EventFlags>,
    }

    fn on_buttons(recorder: &mut Recorder) {
        recorder.seen.push(Event::ButtonsReady);
    }

    fn on_second(recorder: &mut Recorder) {
        recorder.seen.push(Event::RtcSecond);
    }

    fn on_buttons_reraising(recorder: &mut Recorder) {
        recorder.seen.push(Event::ButtonsReady);
        recorder.flags.raise(Event::ButtonsReady);
    }

    fn dispatcher() -> Dispatcher<Recorder> {
        Dispatcher::new()
            .bind(Event::ButtonsReady, on_buttons)
            .bind(Event::RtcSecond, on_second)
    }

    #[test]
    fn lower_bit_is_serviced_first() {
        let flags = EventFlags::new();
        let mut recorder = Recorder::default();
        flags.raise(Event::RtcSecond);
        flags.raise(Event::ButtonsReady);

        assert_eq!(dispatcher().poll(&flags, &mut recorder), 2);
        assert_eq!(recorder.seen, vec![Event::ButtonsReady, Event::RtcSecond]);
        assert_eq!(flags.pending(), 0);
    }

    #[test]
    fn idle_word_runs_nothing() {
        let flags = EventFlags::new();
        let mut recorder = Recorder::default();
        assert_eq!(dispatcher().poll(&flags, &mut recorder), 0);
        assert!(recorder.seen.is_empty());
    }

    #[test]
    fn event_raised_during_its_handler_stays_pending() {
        let mut recorder = Recorder::default();
        let flags = recorder.flags.clone();
        flags.raise(Event::ButtonsReady);
        let dispatcher = Dispatcher::new().bind(Event::ButtonsReady, on_buttons_reraising);

        assert_eq!(dispatcher.poll(&flags, &mut recorder), 1);
        assert!(flags.is_pending(Event::ButtonsReady));

        // Serviced again on the next pass
        assert_eq!(dispatcher.poll(&flags, &mut recorder), 1);
        assert_eq!(recorder.seen.len(), 2);
    }

    #[test]
    fn unbound_event_is_cleared() {
        let flags = EventFlags::new();
        let mut recorder = Recorder::default();
        flags.raise(Event::MultiTapTimeout);
        assert_eq!(dispatcher().poll(&flags, &mut recorder), 0);
        assert!(!flags.is_pending(Event::MultiTapTimeout));
    }

    #[test]
    fn raising_twice_is_idempotent() {
        let flags = EventFlags::new();
        flags.raise(Event::RtcSecond);
        flags.raise(Event::RtcSecond);
        assert_eq!(flags.pending(), Event::RtcSecond.bit());
    }
}
