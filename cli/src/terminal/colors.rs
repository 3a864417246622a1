use colored::Color;

pub const PRIMARY: Color = Color::BrightWhite;
pub const ACCENT: Color = Color::BrightCyan;
pub const SEPARATOR: Color = Color::BrightBlack;
pub const TEXT_DEFAULT: Color = Color::White;

pub const IPV4_ADDR: Color = Color::BrightBlue;
pub const PORT_OPEN: Color = Color::BrightGreen;
pub const MUTED: Color = Color::BrightBlack;
pub const PARTIAL: Color = Color::Yellow;
