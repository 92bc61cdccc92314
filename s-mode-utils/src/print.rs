// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::sync::atomic::{AtomicU8, Ordering};
use spin::Mutex;

pub use crate::{log_debug, log_error, log_info, log_warn, print, println};

/// Interface for a console driver.
pub trait ConsoleDriver: Sync {
    /// Writes `bytes` to the console.
    fn write_bytes(&self, bytes: &[u8]);
}

/// Severity of a log message. Messages less severe than the console's maximum level are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    /// Returns the prefix printed before messages of this level.
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Represents the system console, used by the `print!` and `println!` macros.
pub struct Console {
    driver: Option<&'static dyn ConsoleDriver>,
}

impl Console {
    const fn new() -> Self {
        Self { driver: None }
    }

    /// Sets the driver for the system console.
    pub fn set_driver(driver: &'static dyn ConsoleDriver) {
        CONSOLE.lock().driver = Some(driver);
    }

    /// Sets the least severe level that is printed by the `log_*!` macros.
    pub fn set_max_level(level: LogLevel) {
        MAX_LEVEL.store(level as u8, Ordering::Relaxed);
    }

    /// Returns the least severe level that is printed by the `log_*!` macros.
    pub fn max_level() -> LogLevel {
        LogLevel::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
    }

    /// Returns true if messages of `level` are printed.
    pub fn enabled(level: LogLevel) -> bool {
        level <= Self::max_level()
    }
}

/// The `Console` singleton.
pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// `print` macro based on writing to `CONSOLE`.
#[macro_export]
macro_rules! print {
    ($($args:tt)*) => {
        {
            use core::fmt::Write;
            let _ = write!($crate::print::CONSOLE.lock(), $($args)*);
        }
    };
}

/// `println` macro based on writing to `CONSOLE`.
#[macro_export]
macro_rules! println {
    ($($args:tt)*) => {
        {
            use core::fmt::Write;
            let _ = writeln!($crate::print::CONSOLE.lock(), $($args)*);
        }
    };
}

/// Prints a message prefixed with its level if `level` is enabled.
#[macro_export]
macro_rules! log_at {
    ($level:expr, $($args:tt)*) => {
        {
            let level: $crate::print::LogLevel = $level;
            if $crate::print::Console::enabled(level) {
                use core::fmt::Write;
                let mut console = $crate::print::CONSOLE.lock();
                let _ = write!(console, "[{}] ", level.tag());
                let _ = writeln!(console, $($args)*);
            }
        }
    };
}

/// Logs at `LogLevel::Error`.
#[macro_export]
macro_rules! log_error {
    ($($args:tt)*) => { $crate::log_at!($crate::print::LogLevel::Error, $($args)*) };
}

/// Logs at `LogLevel::Warn`.
#[macro_export]
macro_rules! log_warn {
    ($($args:tt)*) => { $crate::log_at!($crate::print::LogLevel::Warn, $($args)*) };
}

/// Logs at `LogLevel::Info`.
#[macro_export]
macro_rules! log_info {
    ($($args:tt)*) => { $crate::log_at!($crate::print::LogLevel::Info, $($args)*) };
}

/// Logs at `LogLevel::Debug`.
#[macro_export]
macro_rules! log_debug {
    ($($args:tt)*) => { $crate::log_at!($crate::print::LogLevel::Debug, $($args)*) };
}

impl core::fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        if let Some(w) = self.driver {
            w.write_bytes(s.as_bytes());
        }
        Ok(())
    }
}
