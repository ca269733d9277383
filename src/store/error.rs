//! Store-level error taxonomy
//!
//! Messages are user-facing and shown by the client as-is.

use uuid::Uuid;

use super::service::DataError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Brak zalogowanego użytkownika")]
    NotAuthenticated,

    #[error("Nie znaleziono użytkownika o adresie {0}")]
    UserNotFound(String),

    #[error("Nie znaleziono rekordu {0}")]
    NotFound(Uuid),

    #[error("Brak uprawnień do tej operacji")]
    PermissionDenied,

    #[error("Użytkownik ma już dostęp do tego zasobu")]
    AlreadyMember,

    #[error("Użytkownik nie jest członkiem tego zasobu")]
    MemberNotFound,

    #[error("Zaproszenie lub znajomość już istnieje")]
    AlreadyFriends,

    #[error("Nie możesz zaprosić samego siebie")]
    SelfInvite,

    #[error("Ilość nie może być ujemna")]
    InvalidQuantity,

    #[error("Nieprawidłowe dane do zapisu: {0}")]
    InvalidPatch(String),

    #[error("Nieprawidłowe dane z serwera: {0}")]
    Decode(String),

    #[error("{0}")]
    Backend(#[from] DataError),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
