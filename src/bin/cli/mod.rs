pub mod args;
pub mod run;

/// Exit codes for different error conditions
pub mod exit_codes {
    /// Successful execution
    pub const SUCCESS: u8 = 0;
    /// Network/connection error (e.g., host unreachable, handshake rejected)
    pub const NETWORK_ERROR: u8 = 1;
    /// Configuration error (e.g., bad URL, unreadable certificate)
    pub const CONFIG_ERROR: u8 = 2;
    /// Protocol error (e.g., malformed frame, broker ERROR)
    pub const PROTOCOL_ERROR: u8 = 3;
}
