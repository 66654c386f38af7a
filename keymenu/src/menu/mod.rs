//! The menu tree and the engine driving it.
//!
//! Nodes live in a fixed-capacity arena and refer to each other by [NodeId]. The tree is built once
//! at start-up by registering nodes in display order; each node's level relative to the previous
//! one decides where it is linked.

mod engine;
pub mod multitap;
mod table;

use thiserror::Error;
use log::trace;
use crate::timer::TimerError;
pub use engine::*;
pub use table::*;

/// Number of nodes the arena can hold.
pub const MENU_CAPACITY: usize = 50;
/// Longest title, in characters.
pub const TITLE_CAPACITY: usize = 16;
/// Deepest level.
pub const MAX_LEVEL: u8 = 5;

/// Title text, doubling as the value buffer of input nodes.
pub type Title = heapless::String<TITLE_CAPACITY>;

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum MenuError {
    #[error("the menu table is full ({0} nodes)")]
    TableFull(usize),
    #[error("menu level {0} is outside 1..=5")]
    InvalidLevel(u8),
    #[error("the first menu must be at level 1, not {0}")]
    MissingRoot(u8),
    #[error("menu {title:?} goes from level {from} straight to level {to}")]
    LevelSkip { title: String, from: u8, to: u8 },
    #[error("title {0:?} is longer than 16 characters")]
    TitleTooLong(String),
    #[error("title {title:?} is longer than its keyin length {max}")]
    KeyinTooLong { title: String, max: usize },
    #[error("the password must be 6 digits")]
    InvalidPassword,
    #[error(transparent)]
    Timer(#[from] TimerError),
}

/// Index of a node in its tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a node interprets key presses while focused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MenuKind {
    /// Navigation between titles.
    Title,
    /// Digits only.
    Number,
    /// Multi-tap text entry.
    Alphabet,
    /// Pick one of the node's children.
    Option,
    /// Read-only text.
    Info,
}

impl MenuKind {
    /// Whether the node's title holds a value keyed in by the user.
    pub fn is_input(self) -> bool {
        matches!(self, MenuKind::Number | MenuKind::Alphabet | MenuKind::Option)
    }
}

/// What a node renders when it gains focus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MenuAction {
    /// `~Title` on the first line, the next sibling below.
    ShowNavigationTitle,
    /// Blank entry line showing the current value.
    PrepareNumberEntry,
    /// Same as numbers, for multi-tap entry.
    PrepareAlphabetEntry,
    /// The selected child on the second line.
    ShowOptionValue,
    /// The node's text on the second line.
    ShowInfoValue,
    /// Date and time, refreshed every second.
    ShowDateTime,
    /// Password prompt with an empty entry line.
    ValidatePassword,
    /// Date/time field prompt with an empty entry line.
    PromptDateTimeField,
}

#[derive(Debug)]
pub struct MenuNode {
    index: NodeId,
    level: u8,
    title: Title,
    action: MenuAction,
    kind: MenuKind,
    hidden: bool,
    max_keyin: usize,
    next: Option<NodeId>,
    previous: Option<NodeId>,
    parent: Option<NodeId>,
    child: Option<NodeId>,
}

impl MenuNode {
    pub fn id(&self) -> NodeId {
        self.index
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn action(&self) -> MenuAction {
        self.action
    }

    pub fn kind(&self) -> MenuKind {
        self.kind
    }

    /// Whether keyed-in characters are masked on screen.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn max_keyin(&self) -> usize {
        self.max_keyin
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    pub fn previous(&self) -> Option<NodeId> {
        self.previous
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// First child.
    pub fn child(&self) -> Option<NodeId> {
        self.child
    }
}

/// One registration in the menu table.
#[derive(Copy, Clone, Debug)]
pub struct MenuEntry<'t> {
    level: u8,
    title: &'t str,
    action: MenuAction,
    kind: MenuKind,
    hidden: bool,
    max_keyin: usize,
}

impl<'t> MenuEntry<'t> {
    fn new(level: u8, title: &'t str, kind: MenuKind, action: MenuAction, max_keyin: usize) -> Self {
        MenuEntry { level, title, action, kind, hidden: false, max_keyin }
    }

    pub fn title(level: u8, title: &'t str) -> Self {
        Self::new(level, title, MenuKind::Title, MenuAction::ShowNavigationTitle, 0)
    }

    pub fn number(level: u8, max_keyin: usize) -> Self {
        Self::new(level, "", MenuKind::Number, MenuAction::PrepareNumberEntry, max_keyin)
    }

    pub fn alphabet(level: u8, max_keyin: usize) -> Self {
        Self::new(level, "", MenuKind::Alphabet, MenuAction::PrepareAlphabetEntry, max_keyin)
    }

    pub fn option(level: u8) -> Self {
        Self::new(level, "", MenuKind::Option, MenuAction::ShowOptionValue, TITLE_CAPACITY)
    }

    pub fn info(level: u8, text: &'t str) -> Self {
        Self::new(level, text, MenuKind::Info, MenuAction::ShowInfoValue, 0)
    }

    pub fn action(mut self, action: MenuAction) -> Self {
        self.action = action;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// The node arena.
#[derive(Debug, Default)]
pub struct MenuTree {
    nodes: heapless::Vec<MenuNode, MENU_CAPACITY>,
}

impl MenuTree {
    pub const fn new() -> Self {
        MenuTree { nodes: heapless::Vec::new() }
    }

    /// Registers a node after the previously registered one.
    ///
    /// Compared with the previous node, one level deeper makes the node its first child, the same
    /// level makes it the next sibling, and `n` levels shallower makes it the next sibling of the
    /// previous node's `n`-th ancestor.
    ///
    /// # Errors
    /// Every error is a defect in the menu table: the arena is full, a level is out of range or
    /// skipped, the first node is not at level 1, or a title does not fit.
    pub fn add_menu(&mut self, entry: MenuEntry) -> Result<NodeId, MenuError> {
        if !(1..=MAX_LEVEL).contains(&entry.level) {
            return Err(MenuError::InvalidLevel(entry.level));
        }
        if self.nodes.is_full() {
            return Err(MenuError::TableFull(MENU_CAPACITY));
        }

        let mut title = Title::new();
        title
            .push_str(entry.title)
            .map_err(|_| MenuError::TitleTooLong(entry.title.to_string()))?;
        if matches!(entry.kind, MenuKind::Number | MenuKind::Alphabet) && title.len() > entry.max_keyin {
            return Err(MenuError::KeyinTooLong { title: entry.title.to_string(), max: entry.max_keyin });
        }

        let id = NodeId(self.nodes.len());
        let mut node = MenuNode {
            index: id,
            level: entry.level,
            title,
            action: entry.action,
            kind: entry.kind,
            hidden: entry.hidden,
            max_keyin: entry.max_keyin,
            next: None,
            previous: None,
            parent: None,
            child: None,
        };

        match self.nodes.last().map(|last| (last.index, last.level)) {
            None if entry.level != 1 => return Err(MenuError::MissingRoot(entry.level)),
            None => {}
            Some((previous, level)) if entry.level == level + 1 => {
                node.parent = Some(previous);
                self.nodes[previous.0].child = Some(id);
            }
            Some((previous, level)) if entry.level <= level => {
                let mut sibling = previous;
                for _ in entry.level..level {
                    // Levels only grow one at a time, so every deeper node has a parent
                    sibling = self.nodes[sibling.0].parent.ok_or(MenuError::MissingRoot(level))?;
                }
                node.previous = Some(sibling);
                node.parent = self.nodes[sibling.0].parent;
                self.nodes[sibling.0].next = Some(id);
            }
            Some((_, level)) => {
                return Err(MenuError::LevelSkip { title: entry.title.to_string(), from: level, to: entry.level });
            }
        }

        trace!("Added menu {:?} {:?} at level {}.", id, entry.title, entry.level);
        self.nodes
            .push(node)
            .map_err(|_| MenuError::TableFull(MENU_CAPACITY))?;
        Ok(id)
    }

    /// Gets a node. Ids are only handed out by this tree, so the node always exists.
    pub fn node(&self, id: NodeId) -> &MenuNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut MenuNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn title_mut(&mut self, id: NodeId) -> &mut Title {
        &mut self.node_mut(id).title
    }

    /// First registered node.
    pub fn root(&self) -> Option<NodeId> {
        self.nodes.first().map(|node| node.index)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &MenuNode> {
        self.nodes.iter()
    }

    /// Children of a node, first to last.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &MenuNode> + '_ {
        std::iter::successors(self.node(id).child.map(|child| self.node(child)), |node| {
            node.next.map(|next| self.node(next))
        })
    }

    /// Finds a node by its title.
    pub fn find(&self, title: &str) -> Option<NodeId> {
        self.iter().find(|node| node.title() == title).map(MenuNode::id)
    }
}
