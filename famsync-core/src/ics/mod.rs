//! ICS file generation and parsing.
//!
//! The directory store keeps one VEVENT per file, RFC 5545 encoded.

mod generate;
mod parse;

pub(crate) use generate::generate_ics;
pub(crate) use parse::parse_series;
