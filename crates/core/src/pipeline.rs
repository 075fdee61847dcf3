//! 파이프라인 trait: 모듈 생명주기 정의

use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::error::IronflowError;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하 (사유 포함)
    Degraded(String),
    /// 비정상 (사유 포함)
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 모든 수집 모듈이 구현하는 생명주기 trait
///
/// ```text
/// Created → start() → Started → stop() → Stopping → Stopped
/// ```
///
/// `stop()`은 멱등적이어야 합니다. 이미 정지된 모듈에 대한 호출은 no-op입니다.
pub trait Pipeline: Send {
    /// 모듈을 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), IronflowError>> + Send;

    /// 모듈을 정지합니다 (graceful drain 포함).
    fn stop(&mut self) -> impl Future<Output = Result<(), IronflowError>> + Send;

    /// 모듈의 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
