//! Централизованная конфигурация протокольного ядра.
//!
//! Все операторские лимиты определены здесь, чтобы избежать хардкода по
//! всему проекту. Движки читают лимиты через `Config::global()`.

use std::sync::OnceLock;

/// Глобальная конфигурация ядра (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Операторские лимиты протокольного ядра.
///
/// Значения по умолчанию соответствуют поведению установленного wire-формата;
/// оператор может переопределить их один раз через [`Config::install`] до
/// первого использования движков.
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // DOUBLE RATCHET ПАРАМЕТРЫ
    // ============================================
    /// Максимальное количество архивных состояний сессии
    pub max_archived_session_states: usize,

    /// Максимальное количество сохранённых message keys на одну цепочку
    /// (DoS защита)
    pub max_message_keys_per_chain: usize,

    /// Максимальный прыжок счётчика вперёд внутри одной цепочки
    pub max_forward_jumps: u32,

    /// Максимальное количество receiver chains в состоянии сессии
    pub max_receiver_chains: usize,

    // ============================================
    // SENDER KEY ПАРАМЕТРЫ
    // ============================================
    /// Максимальное количество исторических цепочек на (sender, distribution)
    pub max_sender_key_chains: usize,

    // ============================================
    // ВРЕМЕННЫЕ ПАРАМЕТРЫ
    // ============================================
    /// Максимальный возраст sender chain, после которого сессия считается
    /// непригодной для отправки (в миллисекундах)
    /// По умолчанию: 30 дней
    pub session_max_age_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Double Ratchet
            max_archived_session_states: 40,
            max_message_keys_per_chain: 2000,
            max_forward_jumps: 25_000,
            max_receiver_chains: 5,

            // Sender keys
            max_sender_key_chains: 5,

            // Временные параметры
            session_max_age_ms: 30 * 24 * 60 * 60 * 1000, // 30 days
        }
    }
}

impl Config {
    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию
    /// при первом вызове.
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Установить глобальную конфигурацию с операторскими лимитами
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    /// (в том числе неявно, первым обращением движка).
    pub fn install(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bounds_match_wire_format_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.max_archived_session_states, 40);
        assert_eq!(cfg.max_message_keys_per_chain, 2000);
        assert_eq!(cfg.max_forward_jumps, 25_000);
        assert_eq!(cfg.max_receiver_chains, 5);
        assert_eq!(cfg.max_sender_key_chains, 5);
        assert_eq!(cfg.session_max_age_ms, 2_592_000_000);
    }
}
