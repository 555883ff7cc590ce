pub mod client_service;
pub mod cluster_service;
pub mod server;

pub use client_service::ClientService;
pub use cluster_service::ClusterService;
pub use server::GrpcServer;
