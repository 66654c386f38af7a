//! Key handling for the focused menu node.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use log::{debug, info, trace, warn};
use time::{Month, Weekday};
use time::util::days_in_year_month;
use keymenu_gpio::keypad::{ButtonMask, KeypadKey};
use keymenu_gpio::rtc::{RtcDateTime, RtcDriver};
use crate::display::{Align, Attribute, Display, DisplayResult, Shift};
use crate::events::{Event, EventFlags};
use crate::menu::{
    build_menu, multitap, MenuAction, MenuError, MenuKind, MenuNode, MenuTree, NodeId, SpecialNodes,
    PASSWORD_LENGTH, WEEKDAYS,
};
use crate::timer::{TimerConfig, TimerId, TimerService};

const UP: KeypadKey = KeypadKey::Key8;
const DOWN: KeypadKey = KeypadKey::Key0;
const LEFT: KeypadKey = KeypadKey::KeyAsterisk;
const RIGHT: KeypadKey = KeypadKey::KeyHash;

/// Placeholder drawn instead of hidden characters.
const HIDDEN_GLYPH: u8 = b'*';

pub type Password = heapless::String<PASSWORD_LENGTH>;

/// Parses a password, which must be exactly six ASCII digits.
pub fn parse_password(text: &str) -> Option<Password> {
    if text.len() != PASSWORD_LENGTH || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut password = Password::new();
    password.push_str(text).ok()?;
    Some(password)
}

/// Date and time fields collected across the Date Time menu before they reach the RTC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Calendar {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Last valid day of the entered month.
    pub last_day: u8,
}

impl Default for Calendar {
    fn default() -> Self {
        let start = RtcDateTime::FIRST_BOOT;
        Calendar {
            year: start.year,
            month: start.month,
            day: start.day,
            hour: start.hour,
            minute: start.minute,
            second: start.second,
            last_day: 31,
        }
    }
}

/// Everything the engine remembers between key presses.
#[derive(Debug)]
pub struct MenuListState {
    current: NodeId,
    option_cursor: Option<NodeId>,
    keyin_count: usize,
    repeat_count: usize,
    previous_key: Option<KeypadKey>,
    multi_tap_timer: TimerId,
    password: Password,
    calendar: Calendar,
}

impl MenuListState {
    /// The focused node.
    pub fn current(&self) -> NodeId {
        self.current
    }

    /// The child an option node currently shows.
    pub fn option_cursor(&self) -> Option<NodeId> {
        self.option_cursor
    }

    /// Characters keyed into the focused node, including a pending multi-tap glyph.
    pub fn keyin_count(&self) -> usize {
        self.keyin_count
    }

    pub fn repeat_count(&self) -> usize {
        self.repeat_count
    }

    /// The key whose multi-tap glyph is still pending.
    pub fn previous_key(&self) -> Option<KeypadKey> {
        self.previous_key
    }

    pub fn multi_tap_timer(&self) -> TimerId {
        self.multi_tap_timer
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }
}

type SubmitListener = Box<dyn FnMut(NodeId, &str)>;

/// The menu state machine.
///
/// All methods run in the polling loop. The only interrupt-side piece is the multi-tap timer, whose
/// expiry merely raises [Event::MultiTapTimeout].
pub struct MenuEngine {
    tree: MenuTree,
    nodes: SpecialNodes,
    state: MenuListState,
    display: Box<dyn Display>,
    rtc: Box<dyn RtcDriver>,
    timers: Arc<TimerService>,
    multi_tap_ticks: u32,
    on_submit: Option<SubmitListener>,
}

impl Debug for MenuEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MenuEngine")
            .field("current", &self.state.current)
            .field("keyin_count", &self.state.keyin_count)
            .field("display", &self.display)
            .field("rtc", &self.rtc)
            .finish()
    }
}

fn parse_field(value: &str, min: u8, max: u8) -> Option<u8> {
    value.parse::<u8>().ok().filter(|v| (min..=max).contains(v))
}

fn weekday_abbreviation(weekday: Weekday) -> &'static str {
    WEEKDAYS
        .iter()
        .find(|(_, day, _)| *day == weekday)
        .map_or("???", |(_, _, abbreviation)| *abbreviation)
}

impl MenuEngine {
    /// Builds the menu and focuses its root. The display must already be initialized.
    ///
    /// # Errors
    /// - `MenuError::InvalidPassword` if `password` is not six digits.
    /// - Any error of the menu table, or `MenuError::Timer` if the timer pool is full.
    pub fn new(
        display: Box<dyn Display>,
        rtc: Box<dyn RtcDriver>,
        timers: Arc<TimerService>,
        events: Arc<EventFlags>,
        password: &str,
        multi_tap_ticks: u32,
    ) -> Result<Self, MenuError> {
        let password = parse_password(password).ok_or(MenuError::InvalidPassword)?;
        let (tree, nodes) = build_menu()?;
        let multi_tap_timer = timers.initialize(
            TimerConfig::one_shot().on_expire(move |_| events.raise(Event::MultiTapTimeout)),
        )?;
        debug!("Menu built with {} nodes.", tree.len());

        let mut engine = MenuEngine {
            tree,
            nodes,
            state: MenuListState {
                current: nodes.date_time,
                option_cursor: None,
                keyin_count: 0,
                repeat_count: 0,
                previous_key: None,
                multi_tap_timer,
                password,
                calendar: Calendar::default(),
            },
            display,
            rtc,
            timers,
            multi_tap_ticks,
            on_submit: None,
        };
        engine.run_action();
        Ok(engine)
    }

    /// Sets the listener told about every accepted submission, with the submitted value. Hidden
    /// values arrive masked.
    pub fn set_submit_listener(&mut self, listener: impl FnMut(NodeId, &str) + 'static) {
        self.on_submit = Some(Box::new(listener));
    }

    pub fn state(&self) -> &MenuListState {
        &self.state
    }

    pub fn tree(&self) -> &MenuTree {
        &self.tree
    }

    pub fn nodes(&self) -> &SpecialNodes {
        &self.nodes
    }

    pub fn current_node(&self) -> &MenuNode {
        self.tree.node(self.state.current)
    }

    pub fn rtc(&self) -> &dyn RtcDriver {
        self.rtc.as_ref()
    }

    /// Handles a debounced keypad report. Anything but a single key is ignored.
    pub fn button_pressed(&mut self, mask: ButtonMask) {
        let Some(key) = KeypadKey::from_mask(mask) else {
            if mask != 0 {
                debug!("Ignoring key combination {:#06x}.", mask);
            }
            return;
        };
        trace!("Key {} on {:?}", key.to_char(), self.state.current);

        match self.current_node().kind() {
            MenuKind::Title => self.navigate(key),
            MenuKind::Number => self.number_key(key),
            MenuKind::Alphabet => self.alphabet_key(key),
            MenuKind::Option => self.option_key(key),
            MenuKind::Info => {
                if key == LEFT {
                    self.exit_to_parent();
                }
            }
        }
    }

    /// Commits the pending multi-tap glyph once the repeat window has closed.
    pub fn multi_tap_timeout(&mut self) {
        if self.timers.is_armed(self.state.multi_tap_timer) {
            trace!("Multi-tap timer restarted before its timeout was handled.");
            return;
        }
        if self.current_node().kind() == MenuKind::Alphabet {
            self.commit_glyph();
        }
    }

    /// Redraws the clock, if it is on screen.
    pub fn update_date_time(&mut self) {
        if self.state.current != self.nodes.date_time {
            return;
        }
        let now = match self.rtc.date_time() {
            Ok(now) => now,
            Err(e) => {
                warn!("Could not read the RTC: {}", e);
                return;
            }
        };
        let date = format!("20{:02}-{:02}-{:02}", now.year, now.month, now.day);
        let time = format!(
            "{} {:02}:{:02}:{:02}",
            weekday_abbreviation(now.weekday),
            now.hour,
            now.minute,
            now.second
        );
        self.draw(|lcd| {
            lcd.write_string(0, 0, &date, Align::Center)?;
            lcd.write_string(1, 0, &time, Align::Center)
        });
    }

    /// Runs a render step. Display failures only cost the frame.
    fn draw(&mut self, render: impl FnOnce(&mut dyn Display) -> DisplayResult<()>) {
        if let Err(e) = render(self.display.as_mut()) {
            warn!("Rendering {:?} failed: {}", self.state.current, e);
        }
    }

    fn start_multi_tap(&self) {
        if let Err(e) = self.timers.start(self.state.multi_tap_timer, self.multi_tap_ticks) {
            warn!("Could not start the multi-tap timer: {}", e);
        }
    }

    fn stop_multi_tap(&self) {
        if let Err(e) = self.timers.stop(self.state.multi_tap_timer) {
            warn!("Could not stop the multi-tap timer: {}", e);
        }
    }

    fn focus(&mut self, target: NodeId) {
        self.draw(|lcd| lcd.set_attributes(&[Attribute::CursorOff]));
        self.stop_multi_tap();
        debug!("Focus {:?} -> {:?} {:?}", self.state.current, target, self.tree.node(target).title());
        self.state.current = target;
        self.run_action();
    }

    fn exit_to_parent(&mut self) {
        if let Some(parent) = self.current_node().parent() {
            self.focus(parent);
        }
    }

    fn run_action(&mut self) {
        match self.current_node().action() {
            MenuAction::ShowNavigationTitle => self.show_navigation_title(),
            MenuAction::PrepareNumberEntry | MenuAction::PrepareAlphabetEntry => self.show_keyin(),
            MenuAction::ShowOptionValue => self.show_option_value(),
            MenuAction::ShowInfoValue => self.show_info_value(),
            MenuAction::ShowDateTime => self.update_date_time(),
            MenuAction::ValidatePassword => self.prompt_password(),
            MenuAction::PromptDateTimeField => self.prompt_date_time_field(),
        }
    }

    fn show_navigation_title(&mut self) {
        let node = self.current_node();
        let heading = format!("~{}", node.title());
        let below = node
            .next()
            .map(|next| self.tree.node(next).title().to_string())
            .unwrap_or_default();
        self.draw(|lcd| {
            lcd.write_string(0, 0, &heading, Align::Left)?;
            lcd.write_string(1, 1, &below, Align::Left)
        });
    }

    /// Blanks the entry line and shows the cursor at its start.
    fn prepare_keyin(&mut self) {
        self.state.keyin_count = 0;
        self.state.repeat_count = 0;
        self.state.previous_key = None;
        self.stop_multi_tap();
        self.draw(|lcd| {
            lcd.write_string(1, 0, "", Align::Left)?;
            lcd.go_to(1, 0)?;
            lcd.set_attributes(&[Attribute::CursorOn])
        });
    }

    /// Entry line holding the node's current value, ready for more input.
    fn show_keyin(&mut self) {
        self.prepare_keyin();
        let node = self.current_node();
        let count = node.title().len();
        let shown: Vec<u8> = if node.is_hidden() {
            vec![HIDDEN_GLYPH; count]
        } else {
            node.title().bytes().collect()
        };
        self.draw(|lcd| shown.iter().try_for_each(|b| lcd.write_character(*b)));
        self.state.keyin_count = count;
    }

    fn prompt_password(&mut self) {
        let current = self.state.current;
        let prompt = match current {
            id if id == self.nodes.old_password => "Old Password",
            id if id == self.nodes.new_password => "New Password",
            id if id == self.nodes.confirm_password => "Confirm Password",
            _ => "Key in password",
        };
        self.tree.title_mut(current).clear();
        self.draw(|lcd| lcd.write_string(0, 0, prompt, Align::Left));
        self.prepare_keyin();
    }

    fn prompt_date_time_field(&mut self) {
        let current = self.state.current;
        let n = self.nodes;
        let prompt = match current {
            id if id == n.year => "Year(0-99)",
            id if id == n.month => "Month(1-12)",
            id if id == n.day => "Date(1-31)",
            id if id == n.hour => "Hour(0-23)",
            id if id == n.minute => "Minute(0-59)",
            id if id == n.second => "Second(0-59)",
            _ => "Week Day",
        };
        self.tree.title_mut(current).clear();
        self.draw(|lcd| lcd.write_string(0, 0, prompt, Align::Left));
        if self.current_node().kind() == MenuKind::Option {
            self.show_option_value();
        } else {
            self.prepare_keyin();
        }
    }

    /// Puts the option cursor on the child matching the node's value, or on the first child.
    fn show_option_value(&mut self) {
        let current = self.state.current;
        let value = self.tree.node(current).title();
        let selected = self
            .tree
            .children(current)
            .find(|child| child.title() == value)
            .or_else(|| self.tree.children(current).next())
            .map(MenuNode::id);
        self.state.option_cursor = selected;

        let label = selected.map(|id| self.tree.node(id).title().to_string()).unwrap_or_default();
        self.draw(|lcd| lcd.write_string(1, 1, &label, Align::Left));
    }

    fn show_info_value(&mut self) {
        let text = self.current_node().title().to_string();
        self.draw(|lcd| lcd.write_string(1, 1, &text, Align::Left));
    }

    fn navigate(&mut self, key: KeypadKey) {
        let node = self.current_node();
        let target = match key {
            UP => node.previous(),
            DOWN => node.next(),
            LEFT => node.parent(),
            RIGHT => node.child(),
            _ => None,
        };
        if let Some(target) = target {
            self.focus(target);
        }
    }

    fn number_key(&mut self, key: KeypadKey) {
        if let Some(digit) = key.digit() {
            self.append_digit(digit);
            return;
        }
        match key {
            LEFT => self.erase_digit(),
            RIGHT => self.process_data(),
            _ => {}
        }
    }

    fn append_digit(&mut self, digit: char) {
        let current = self.state.current;
        let node = self.tree.node(current);
        let count = self.state.keyin_count;
        if count >= node.max_keyin() {
            return;
        }
        let shown = if node.is_hidden() { HIDDEN_GLYPH } else { digit as u8 };

        let title = self.tree.title_mut(current);
        title.truncate(count);
        if title.push(digit).is_err() {
            warn!("Value of {:?} is full.", current);
            return;
        }
        self.state.keyin_count = count + 1;
        self.draw(|lcd| lcd.write_character(shown));
    }

    fn erase_digit(&mut self) {
        if self.state.keyin_count == 0 {
            self.exit_to_parent();
            return;
        }
        self.state.keyin_count -= 1;
        let (current, count) = (self.state.current, self.state.keyin_count);
        self.tree.title_mut(current).truncate(count);
        self.draw(|lcd| {
            lcd.shift(Shift::CursorLeft)?;
            lcd.write_character(b' ')?;
            lcd.shift(Shift::CursorLeft)
        });
    }

    fn alphabet_key(&mut self, key: KeypadKey) {
        if let Some(glyphs) = multitap::glyphs(key) {
            self.tap(key, glyphs);
            return;
        }
        match key {
            LEFT => self.erase_glyph(),
            RIGHT => {
                self.stop_multi_tap();
                self.process_data();
            }
            _ => self.commit_glyph(),
        }
    }

    /// Cycles the pending glyph when the same key is tapped again, otherwise commits it and starts
    /// a new one. The pending glyph sits under the cursor until it is committed.
    fn tap(&mut self, key: KeypadKey, glyphs: &'static [u8]) {
        let current = self.state.current;
        // The timeout event may still be queued behind this key
        if !self.timers.is_armed(self.state.multi_tap_timer) {
            self.commit_glyph();
        }
        let (count, repeat) = if self.state.previous_key == Some(key) {
            let repeat = (self.state.repeat_count + 1) % glyphs.len();
            (self.state.keyin_count.saturating_sub(1), repeat)
        } else {
            self.commit_glyph();
            if self.state.keyin_count >= self.tree.node(current).max_keyin() {
                return;
            }
            (self.state.keyin_count, 0)
        };
        let glyph = glyphs[repeat];

        let title = self.tree.title_mut(current);
        title.truncate(count);
        if title.push(glyph as char).is_err() {
            warn!("Value of {:?} is full.", current);
            return;
        }
        self.state.keyin_count = count + 1;
        self.state.repeat_count = repeat;
        self.state.previous_key = Some(key);
        self.draw(|lcd| {
            lcd.write_character(glyph)?;
            lcd.shift(Shift::CursorLeft)
        });
        self.start_multi_tap();
    }

    fn commit_glyph(&mut self) {
        if self.state.previous_key.take().is_none() {
            return;
        }
        self.state.repeat_count = 0;
        self.draw(|lcd| lcd.shift(Shift::CursorRight));
    }

    fn erase_glyph(&mut self) {
        self.stop_multi_tap();
        if self.state.keyin_count == 0 {
            self.exit_to_parent();
            return;
        }
        let pending = self.state.previous_key.take().is_some();
        self.state.repeat_count = 0;
        self.state.keyin_count -= 1;
        let (current, count) = (self.state.current, self.state.keyin_count);
        self.tree.title_mut(current).truncate(count);
        self.draw(|lcd| {
            if !pending {
                lcd.shift(Shift::CursorLeft)?;
            }
            lcd.write_character(b' ')?;
            lcd.shift(Shift::CursorLeft)
        });
    }

    fn option_key(&mut self, key: KeypadKey) {
        match key {
            UP | DOWN => {
                let Some(cursor) = self.state.option_cursor else {
                    return;
                };
                let node = self.tree.node(cursor);
                let Some(target) = (if key == UP { node.previous() } else { node.next() }) else {
                    trace!("Option cursor already at the end.");
                    return;
                };
                self.state.option_cursor = Some(target);
                let label = self.tree.node(target).title().to_string();
                self.draw(|lcd| lcd.write_string(1, 1, &label, Align::Left));
            }
            LEFT => self.exit_to_parent(),
            RIGHT => {
                let Some(cursor) = self.state.option_cursor else {
                    return;
                };
                let label = self.tree.node(cursor).title.clone();
                *self.tree.title_mut(self.state.current) = label;
                self.process_data();
            }
            _ => {}
        }
    }

    /// Validates the focused node's value and moves on, or re-prompts the same node.
    fn process_data(&mut self) {
        let current = self.state.current;
        let keyin = matches!(self.current_node().kind(), MenuKind::Number | MenuKind::Alphabet);
        if keyin {
            let count = self.state.keyin_count;
            self.tree.title_mut(current).truncate(count);
        }
        let value = self.current_node().title().to_string();

        match self.validate(current, &value) {
            Some(destination) => {
                let submitted = if self.current_node().is_hidden() {
                    debug!("{:?} accepted a hidden value.", current);
                    (HIDDEN_GLYPH as char).to_string().repeat(value.len())
                } else {
                    debug!("{:?} accepted {:?}.", current, value);
                    value
                };
                if let Some(listener) = self.on_submit.as_mut() {
                    listener(current, &submitted);
                }
                self.focus(destination);
            }
            None => {
                debug!("{:?} rejected its value.", current);
                if keyin {
                    self.tree.title_mut(current).clear();
                }
                self.state.keyin_count = 0;
                self.state.repeat_count = 0;
                self.state.previous_key = None;
                self.run_action();
            }
        }
    }

    /// Checks a submitted value, returning where focus goes next.
    fn validate(&mut self, current: NodeId, value: &str) -> Option<NodeId> {
        let n = self.nodes;
        let node = self.tree.node(current);
        let (next, parent) = (node.next(), node.parent());
        let calendar = &mut self.state.calendar;

        match current {
            id if id == n.password => (value == self.state.password.as_str()).then_some(n.first_menu),
            id if id == n.year => {
                calendar.year = parse_field(value, 0, 99)?;
                next
            }
            id if id == n.month => {
                let month = parse_field(value, 1, 12)?;
                calendar.month = month;
                calendar.last_day = days_in_year_month(2000 + calendar.year as i32, Month::try_from(month).ok()?);
                next
            }
            id if id == n.day => {
                calendar.day = parse_field(value, 1, calendar.last_day)?;
                next
            }
            id if id == n.hour => {
                calendar.hour = parse_field(value, 0, 23)?;
                next
            }
            id if id == n.minute => {
                calendar.minute = parse_field(value, 0, 59)?;
                next
            }
            id if id == n.second => {
                calendar.second = parse_field(value, 0, 59)?;
                next
            }
            id if id == n.weekday => {
                let (_, weekday, _) = WEEKDAYS.iter().find(|(label, _, _)| *label == value)?;
                let date_time = RtcDateTime {
                    year: calendar.year,
                    month: calendar.month,
                    day: calendar.day,
                    hour: calendar.hour,
                    minute: calendar.minute,
                    second: calendar.second,
                    weekday: *weekday,
                };
                match self.rtc.set_date_time(date_time) {
                    Ok(()) => {
                        info!("Clock set to {:?}.", date_time);
                        parent
                    }
                    Err(e) => {
                        warn!("Could not set the clock to {:?}: {}", date_time, e);
                        None
                    }
                }
            }
            id if id == n.old_password => (value == self.state.password.as_str()).then_some(next).flatten(),
            id if id == n.new_password => parse_password(value).and(next),
            id if id == n.confirm_password => {
                if value != self.tree.node(n.new_password).title() {
                    return None;
                }
                self.state.password = parse_password(value)?;
                info!("Password changed.");
                parent
            }
            _ => parent,
        }
    }
}
