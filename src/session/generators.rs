use async_trait::async_trait;
use uuid::Uuid;

/// Trait for generating session identifiers
#[async_trait]
pub trait SessionIdGenerator: Send + Sync {
    async fn generate(&self) -> String;
}

/// Random UUID v4 session identifiers
pub struct UuidSessionIdGenerator;

impl UuidSessionIdGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UuidSessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionIdGenerator for UuidSessionIdGenerator {
    async fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uuid_session_id_generator() {
        let generator = UuidSessionIdGenerator::new();
        let first = generator.generate().await;
        let second = generator.generate().await;

        assert!(Uuid::parse_str(&first).is_ok());
        assert_ne!(first, second);
    }
}
