pub mod capacity;
pub mod composite_quota;
pub mod elastic_quota;
pub mod predicate;
pub mod queue;
pub mod runner;
pub mod scheduler_loop;

pub use composite_quota::CompositeElasticQuotaReconciler;
pub use elastic_quota::ElasticQuotaReconciler;
pub use runner::{Controller, Reconciler};
pub use scheduler_loop::SchedulerController;
