#![warn(missing_docs)]

//! sdkit scheduling subsystem: load balancers, a lock-free SPSC ring buffer,
//! a dependency-ordered async executor and a hashed-wheel timer.

pub mod balancer;
pub mod cancel;
pub mod dag;
pub mod error;
pub mod ring;
pub mod wheel;

pub use balancer::{
    BalancePolicy, Balancer, BalancerConfig, ConnectionGuard, LeastConnections, RandomBalancer,
    RoundRobin, WeightedRoundRobin,
};
pub use cancel::{new_cancel_pair, CancelHandle, CancelReason, CancelToken};
pub use dag::{DagConfig, DagExecutor, ErrorObserver, RunReport};
pub use error::{SchedError, SchedResult, TaskError};
pub use ring::{Consumer, Producer, RingConfig};
pub use wheel::{HashedWheelTimer, TimeoutHandle, TimerConfig};
