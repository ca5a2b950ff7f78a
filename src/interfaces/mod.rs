//! Batch input and output for the command-line front end.

pub mod csv;
