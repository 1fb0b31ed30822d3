use colored::{Color, Colorize};

/// Prints the given string with the given color.
///
/// ## Example
/// ```
/// use dircon::utils::utils_console::{dircon_print, PrintMode, PrintColor};
/// dircon_print("test", PrintMode::Println, PrintColor::Blue, false);
/// ```
pub fn dircon_print(s: &str, mode: PrintMode, color: PrintColor, bolded: bool) {
    let mut string = s.normal();
    if bolded { string = string.bold(); }
    if let Some(c) = color.get_color() { string = string.color(c); }
    match mode {
        PrintMode::Println => { println!("{}", string); }
        PrintMode::Print => { print!("{}", string); }
    }
}

pub fn dircon_print_new_line() {
    dircon_print("\n", PrintMode::Print, PrintColor::None, false);
}

/// Println will cause a new line after the given string, while Print will not.
#[derive(Clone, Debug)]
pub enum PrintMode {
    Println,
    Print
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrintColor {
    None,
    Blue,
    Green,
    Red,
    Yellow,
    Cyan
}
impl PrintColor {
    pub fn get_color(&self) -> Option<Color> {
        match self {
            PrintColor::None => { None }
            PrintColor::Blue => { Some(Color::Blue) }
            PrintColor::Green => { Some(Color::Green) }
            PrintColor::Red => { Some(Color::Red) }
            PrintColor::Yellow => { Some(Color::Yellow) }
            PrintColor::Cyan => { Some(Color::Cyan) }
        }
    }
}
