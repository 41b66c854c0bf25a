// Вспомогательные утилиты

pub mod uuid;
