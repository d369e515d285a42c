//! Crossfire command-line front end: runtime configuration, the WebDriver
//! automation backend and the terminal console.

pub mod config;
pub mod console;
pub mod webdriver;
