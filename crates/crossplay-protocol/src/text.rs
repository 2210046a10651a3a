//! Chat text components.
//!
//! The backend edition sends chat as a tree of styled components; the
//! client edition only understands flat strings with section-sign
//! formatting codes. [`TextComponent::to_legacy`] bridges the two.

use serde::{Deserialize, Serialize};

/// The sixteen named chat colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    DarkBlue,
    DarkGreen,
    DarkAqua,
    DarkRed,
    DarkPurple,
    Gold,
    Gray,
    DarkGray,
    Blue,
    Green,
    Aqua,
    Red,
    LightPurple,
    Yellow,
    White,
}

impl Color {
    /// The legacy formatting code character.
    pub fn code(self) -> char {
        match self {
            Self::Black => '0',
            Self::DarkBlue => '1',
            Self::DarkGreen => '2',
            Self::DarkAqua => '3',
            Self::DarkRed => '4',
            Self::DarkPurple => '5',
            Self::Gold => '6',
            Self::Gray => '7',
            Self::DarkGray => '8',
            Self::Blue => '9',
            Self::Green => 'a',
            Self::Aqua => 'b',
            Self::Red => 'c',
            Self::LightPurple => 'd',
            Self::Yellow => 'e',
            Self::White => 'f',
        }
    }
}

const SECTION: char = '\u{a7}';

/// A styled piece of chat text with optional children.
///
/// Children inherit every style their parent sets and may add their own.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextComponent {
    pub text: String,
    pub color: Option<Color>,
    pub bold: bool,
    pub italic: bool,
    pub underlined: bool,
    pub strikethrough: bool,
    pub extra: Vec<TextComponent>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq)]
struct Style {
    color: Option<Color>,
    bold: bool,
    italic: bool,
    underlined: bool,
    strikethrough: bool,
}

impl Style {
    fn is_plain(&self) -> bool {
        *self == Style::default()
    }
}

impl TextComponent {
    /// An unstyled component.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn italic(mut self) -> Self {
        self.italic = true;
        self
    }

    pub fn with_extra(mut self, child: TextComponent) -> Self {
        self.extra.push(child);
        self
    }

    /// The text with all styling stripped.
    pub fn plain(&self) -> String {
        let mut out = String::new();
        self.write_plain(&mut out);
        out
    }

    fn write_plain(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.extra {
            child.write_plain(out);
        }
    }

    /// Flattens the tree into a legacy formatted string.
    ///
    /// Unstyled text produces no codes at all, so plain chat passes
    /// through unchanged.
    pub fn to_legacy(&self) -> String {
        let mut out = String::new();
        let mut active = Style::default();
        self.write_legacy(Style::default(), &mut active, &mut out);
        out
    }

    fn write_legacy(&self, inherited: Style, active: &mut Style, out: &mut String) {
        let style = Style {
            color: self.color.or(inherited.color),
            bold: self.bold || inherited.bold,
            italic: self.italic || inherited.italic,
            underlined: self.underlined || inherited.underlined,
            strikethrough: self.strikethrough || inherited.strikethrough,
        };

        if !self.text.is_empty() && style != *active {
            if !active.is_plain() {
                out.push(SECTION);
                out.push('r');
            }
            if let Some(color) = style.color {
                out.push(SECTION);
                out.push(color.code());
            }
            for (on, code) in [
                (style.bold, 'l'),
                (style.strikethrough, 'm'),
                (style.underlined, 'n'),
                (style.italic, 'o'),
            ] {
                if on {
                    out.push(SECTION);
                    out.push(code);
                }
            }
            *active = style;
        }
        out.push_str(&self.text);

        for child in &self.extra {
            child.write_legacy(style, active, out);
        }
    }
}

impl From<&str> for TextComponent {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for TextComponent {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_legacy_plain_text_has_no_codes() {
        assert_eq!(TextComponent::new("Test").to_legacy(), "Test");
    }

    #[test]
    fn test_to_legacy_colored_and_bold() {
        let c = TextComponent::new("hi").color(Color::Red).bold();
        assert_eq!(c.to_legacy(), "\u{a7}c\u{a7}lhi");
    }

    #[test]
    fn test_to_legacy_children_inherit_and_reset() {
        let c = TextComponent::new("warn: ")
            .color(Color::Yellow)
            .with_extra(TextComponent::new("boom").bold())
            .with_extra(TextComponent::new("!"));
        // "!" inherits yellow only, so bold must be reset.
        assert_eq!(
            c.to_legacy(),
            "\u{a7}ewarn: \u{a7}r\u{a7}e\u{a7}lboom\u{a7}r\u{a7}e!"
        );
    }

    #[test]
    fn test_to_legacy_same_style_emits_codes_once() {
        let c = TextComponent::new("a")
            .color(Color::Green)
            .with_extra(TextComponent::new("b"));
        assert_eq!(c.to_legacy(), "\u{a7}aab");
    }

    #[test]
    fn test_plain_concatenates_tree() {
        let c = TextComponent::new("a")
            .with_extra(TextComponent::new("b").with_extra(TextComponent::new("c")));
        assert_eq!(c.plain(), "abc");
    }
}
