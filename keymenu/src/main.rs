use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use dotenv::dotenv;
use log::{debug, info, warn};
use keymenu::app::App;
use keymenu::config::Config;
use keymenu::display::{Hd44780Display, VISIBLE_COLUMNS};
use keymenu::events::EventFlags;
use keymenu::timer::TimerService;
use keymenu_gpio::GpioActiveLevel;
use keymenu_gpio::keypad::{GpioKeypadMatrix, KeypadKey, SimulatedMatrix};
use keymenu_gpio::lcd::hd44780::LINES;
use keymenu_gpio::lcd::hd44780::driver::{LcdScreen, SimulatedHD44780};
use keymenu_gpio::rtc::SystemRtc;

fn frame(screen: &LcdScreen) -> String {
    let border = format!("+{}+", "-".repeat(VISIBLE_COLUMNS));
    let mut frame = border.clone();
    for line in 0..LINES {
        frame.push_str(&format!("\n|{}|", screen.visible_line(line)));
    }
    frame.push('\n');
    frame.push_str(&border);
    frame
}

fn main() -> eyre::Result<()> {
    // Initialize environment and logger
    dotenv().ok();
    pretty_env_logger::init();

    info!("Keymenu starting...");

    debug!("Trying to load config...");
    let config = if let Some(config) = Config::try_load() {
        info!("Config loaded.");
        config
    } else {
        info!("Config not found. Using default");
        let config = Config::default();
        config.save()?;
        info!("Default config saved.");
        config
    };
    config.validate()?;

    let timers = Arc::new(TimerService::new());
    let events = Arc::new(EventFlags::new());

    // The LCD power-on delays count ticks, so ticking starts first
    let ticker = timers.clone();
    let tick_period = Duration::from_micros(config.tick_period_us);
    thread::Builder::new().name("tick".to_string()).spawn(move || loop {
        ticker.tick();
        thread::sleep(tick_period);
    })?;

    debug!("Initializing keypad...");
    let keypad = SimulatedMatrix::new();
    let matrix = GpioKeypadMatrix::new(Box::new(keypad.columns()), Box::new(keypad.rows()))
        .with_active_level(GpioActiveLevel::Low)
        .with_edge_latch(Box::new(keypad.edge_latch()));
    debug!("{:?} initialized.", matrix);

    let driver = SimulatedHD44780::new();
    let screen = driver.screen(VISIBLE_COLUMNS);
    let lcd = Hd44780Display::new(driver, timers.clone(), config.lcd_timing())?;

    let rtc = SystemRtc::open(config.rtc_state_file.clone())?;
    if rtc.is_first_boot() {
        info!("RTC was never set, starting from 2001-01-01.");
    }

    let mut app = App::new(&config, timers, events, Box::new(lcd), Box::new(rtc), Box::new(matrix))?;
    let lines = app.interrupt_lines();

    let wakeup = lines.clone();
    thread::Builder::new().name("rtc".to_string()).spawn(move || loop {
        thread::sleep(Duration::from_secs(1));
        wakeup.rtc_wakeup();
    })?;

    let key_hold = Duration::from_millis(config.key_hold_ms);
    thread::Builder::new().name("keypad".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            for c in line.chars().filter(|c| !c.is_whitespace()) {
                let Some(key) = KeypadKey::from_char(c) else {
                    warn!("No key labelled {:?}.", c);
                    continue;
                };
                if let Some(row) = keypad.press(key) {
                    lines.keypad_row_edge(row);
                }
                thread::sleep(key_hold);
                keypad.release(key);
                thread::sleep(key_hold);
            }
        }
        info!("Keyboard input closed.");
    })?;

    info!("Keys: 0-9, A-D, * and #. 8/0 move up/down, * goes back, # enters.");
    info!("Starting main loop...");

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut shown = String::new();
    loop {
        app.poll();
        let current = frame(&screen);
        if current != shown {
            println!("{}", current);
            shown = current;
        }
        thread::sleep(poll_interval);
    }
}
