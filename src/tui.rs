//! Terminal output helpers: status macros and result-table headers.
//!
//! The macros take an optional `accessible` flag. Accessible output drops the
//! colored `[!]`/`[~]`/`[>]` prefixes so screen readers only see the message.
use colored::Colorize;

/// Prints a warning, prefixed with a red `[!]`.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $accessible:expr) => {
        if $accessible {
            println!("{}", $name);
        } else {
            $crate::warning!($name);
        }
    };
}

/// Prints an informational detail, prefixed with a blue `[~]`.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
    };
    ($name:expr, $accessible:expr) => {
        if $accessible {
            println!("{}", $name);
        } else {
            $crate::detail!($name);
        }
    };
}

/// Prints a notable result, prefixed with a green `[>]`.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!("{} {}", colored::Colorize::bold(colored::Colorize::green("[>]")), $name);
    };
    ($name:expr, $accessible:expr) => {
        if $accessible {
            println!("{}", $name);
        } else {
            $crate::output!($name);
        }
    };
}

/// Column header for the direct probe's result lines.
pub fn print_direct_header() {
    println!();
    print!("{}  ", format!("{:<15}", "IP").cyan());
    print!("{}  ", format!("{:<4}", "CODE").yellow());
    print!("{}  ", format!("{:<16}", "SERVER").magenta());
    println!("{}", "HOST".green());
    println!("{:<15}  {:<4}  {:<16}  {}", "---", "----", "------", "----");
    println!();
}

/// Column header shared by the SNI and ping probes.
pub fn print_host_header(second_column: &str) {
    println!("{:<16} {:<20}", "IP Address", second_column);
    println!("{:<16} {:<20}", "----------", "-".repeat(second_column.len()));
}
