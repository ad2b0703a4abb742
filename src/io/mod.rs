//! Binary file I/O helpers shared by persistence, assignment, and training
//! sample loading (spec §6 "External interfaces").

pub mod vector_file;
