use std::fmt;
use std::sync::Arc;

/// Declares a strongly typed identifier wrapping an `Arc<String>` for cheap cloning.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub Arc<String>);

        impl $name {
            /// Fresh random (v4 UUID) identifier.
            pub fn generate() -> Self {
                $name(Arc::new(uuid::Uuid::new_v4().to_string()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(Arc::new(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(Arc::new(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// A WebSocket client connected to the relay.
    ClientId
);

string_id!(
    /// An HTTP `/signal` offer waiting for its answer.
    OfferId
);

string_id!(
    /// One call attempt (one session plus one channel).
    CallId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_conversion() {
        let id = ClientId::from("client-1");
        assert_eq!(id.as_ref(), "client-1");

        let id2 = ClientId::from(String::from("client-2"));
        assert_eq!(id2.to_string(), "client-2");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = OfferId::generate();
        let b = OfferId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_ref().len(), 36);
    }

    #[test]
    fn test_display_trait() {
        let id = CallId::from("call-string");
        assert_eq!(format!("{}", id), "call-string");
    }
}
