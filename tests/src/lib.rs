//! Fusebox testing utilities
//!
//! Provides mock dependencies for exercising circuit breakers without
//! live credential stores, LLM providers, or mail APIs.


pub use service::{BackendService, FailingService, HealthyService, RecoveringService, ServiceError};

/// Assert how many times a mock service was actually invoked.
#[macro_export]
macro_rules! assert_service_calls {
    ($service:expr, $expected:expr) => {
        assert_eq!(
            $service.calls(),
            $expected,
            "expected {} calls to reach '{}'",
            $expected,
            $service.name()
        );
    };
}
