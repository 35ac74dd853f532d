//! Errors at the controller boundary

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    /// Amount is not a positive, finite number.
    #[error("Monto inválido")]
    InvalidAmount,

    /// A credit arrived while no payment was pending.
    #[error("No hay un pago en curso")]
    NoActiveSession,

    /// The controller task is gone or did not answer.
    #[error("Controlador de efectivo no disponible")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_client_facing() {
        assert_eq!(ControllerError::InvalidAmount.to_string(), "Monto inválido");
        assert_eq!(
            ControllerError::Unavailable.to_string(),
            "Controlador de efectivo no disponible"
        );
    }
}
