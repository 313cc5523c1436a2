mod maintenance;

pub use maintenance::PoolMaintenanceTask;
