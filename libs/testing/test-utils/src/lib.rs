//! Shared test utilities for notification testing
//!
//! This crate provides reusable test infrastructure for the workspace:
//! - `TestRabbitMq`: RabbitMQ container with automatic cleanup (feature: "rabbitmq")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! # Features
//!
//! - `rabbitmq`: Enables RabbitMQ test infrastructure (needs Docker)
//! - `all`: Enables all container-backed test infrastructure
//!
//! # Usage
//!
//! Add `features = ["rabbitmq"]` to your dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["rabbitmq"] }
//! ```
//!
//! Then in your tests:
//!
//! ```rust,ignore
//! use test_utils::{TestDataBuilder, TestRabbitMq};
//!
//! #[tokio::test]
//! #[ignore = "requires Docker"]
//! async fn my_broker_test() {
//!     let rabbit = TestRabbitMq::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_broker_test");
//!
//!     let broker = AmqpBroker::connect(rabbit.url()).await.unwrap();
//!     let email = builder.email("donor");
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "rabbitmq")]
mod rabbitmq;

#[cfg(feature = "rabbitmq")]
pub use rabbitmq::TestRabbitMq;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by deriving all values from one seed.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_verification_email");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic tenant ID
    pub fn tenant_id(&self) -> Uuid {
        let bytes = self.seed.to_le_bytes();
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes[..8].copy_from_slice(&bytes);
        uuid_bytes[8..16].copy_from_slice(&bytes);
        Uuid::from_bytes(uuid_bytes)
    }

    /// Deterministic email address, e.g. `donor-12345@example.com`
    pub fn email(&self, local: &str) -> String {
        format!("{}-{}@example.com", local, self.seed)
    }

    /// Deterministic verification token
    pub fn token(&self) -> String {
        format!("tok_{:016x}", self.seed)
    }

    /// Unique resource name, e.g. `test-queue-12345-main`
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}
