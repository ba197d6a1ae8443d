//! Приёмники событий: консоль и файл с ежедневной ротацией.

pub mod console;
pub mod file;
