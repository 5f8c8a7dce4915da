// Cluster lifecycle commands
pub mod install;
pub mod upgrade;

// Storage
pub mod volume;

// Operational commands
pub mod dashboard;
pub mod diagnose;
pub mod info;
pub mod seed_registry;
pub mod version;

// Node check plumbing invoked by the preflight playbook
pub mod preflight;
