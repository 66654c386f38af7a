use time::Weekday;
use crate::menu::{MenuAction, MenuEntry, MenuError, MenuTree, NodeId};

/// Length of the device password.
pub const PASSWORD_LENGTH: usize = 6;

/// Weekday option labels with their RTC value and home screen abbreviation.
pub const WEEKDAYS: [(&str, Weekday, &str); 7] = [
    ("Monday", Weekday::Monday, "MON"),
    ("Tuesday", Weekday::Tuesday, "TUE"),
    ("Wednesday", Weekday::Wednesday, "WED"),
    ("Thursday", Weekday::Thursday, "THU"),
    ("Friday", Weekday::Friday, "FRI"),
    ("Saturday", Weekday::Saturday, "SAT"),
    ("Sunday", Weekday::Sunday, "SUN"),
];

/// Nodes whose submissions are validated individually.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SpecialNodes {
    /// The root, showing the clock.
    pub date_time: NodeId,
    /// Password gate between the clock and the menus.
    pub password: NodeId,
    /// First menu behind the password.
    pub first_menu: NodeId,
    pub year: NodeId,
    pub month: NodeId,
    pub day: NodeId,
    pub hour: NodeId,
    pub minute: NodeId,
    pub second: NodeId,
    pub weekday: NodeId,
    pub old_password: NodeId,
    pub new_password: NodeId,
    pub confirm_password: NodeId,
}

/// Builds the device menu.
pub fn build_menu() -> Result<(MenuTree, SpecialNodes), MenuError> {
    let mut tree = MenuTree::new();
    let date_field = || MenuEntry::number(4, 2).action(MenuAction::PromptDateTimeField);
    let secret = || MenuEntry::number(4, PASSWORD_LENGTH).hidden().action(MenuAction::ValidatePassword);

    let date_time = tree.add_menu(MenuEntry::title(1, "").action(MenuAction::ShowDateTime))?;
    let password = tree.add_menu(MenuEntry::number(2, PASSWORD_LENGTH).hidden().action(MenuAction::ValidatePassword))?;
    let first_menu = tree.add_menu(MenuEntry::title(2, "Setting"))?;

    tree.add_menu(MenuEntry::title(3, "User Name"))?;
    tree.add_menu(MenuEntry::alphabet(4, 8))?;
    tree.add_menu(MenuEntry::title(3, "Serial Number"))?;
    tree.add_menu(MenuEntry::number(4, 8))?;

    tree.add_menu(MenuEntry::title(3, "Temperature"))?;
    tree.add_menu(MenuEntry::option(4))?;
    for label in ["Low", "Medium", "High"] {
        tree.add_menu(MenuEntry::title(5, label))?;
    }

    tree.add_menu(MenuEntry::title(3, "Backlight"))?;
    tree.add_menu(MenuEntry::option(4))?;
    for label in ["ON", "OFF"] {
        tree.add_menu(MenuEntry::title(5, label))?;
    }

    tree.add_menu(MenuEntry::title(3, "Date Time"))?;
    let year = tree.add_menu(date_field())?;
    let month = tree.add_menu(date_field())?;
    let day = tree.add_menu(date_field())?;
    let hour = tree.add_menu(date_field())?;
    let minute = tree.add_menu(date_field())?;
    let second = tree.add_menu(date_field())?;
    let weekday = tree.add_menu(MenuEntry::option(4).action(MenuAction::PromptDateTimeField))?;
    for (label, _, _) in WEEKDAYS {
        tree.add_menu(MenuEntry::title(5, label))?;
    }

    tree.add_menu(MenuEntry::title(3, "Change Password"))?;
    let old_password = tree.add_menu(secret())?;
    let new_password = tree.add_menu(secret())?;
    let confirm_password = tree.add_menu(secret())?;

    tree.add_menu(MenuEntry::title(2, "Report"))?;
    tree.add_menu(MenuEntry::title(3, "Daily Report"))?;
    tree.add_menu(MenuEntry::title(3, "Weekly Report"))?;
    tree.add_menu(MenuEntry::title(3, "Monthly Report"))?;

    tree.add_menu(MenuEntry::title(2, "Info"))?;
    tree.add_menu(MenuEntry::title(3, "Version"))?;
    tree.add_menu(MenuEntry::info(4, "V1.0.0"))?;
    tree.add_menu(MenuEntry::title(3, "Last Update"))?;
    tree.add_menu(MenuEntry::info(4, "20.05.25 23:00"))?;

    let nodes = SpecialNodes {
        date_time,
        password,
        first_menu,
        year,
        month,
        day,
        hour,
        minute,
        second,
        weekday,
        old_password,
        new_password,
        confirm_password,
    };
    Ok((tree, nodes))
}
