pub mod config;
pub mod error;
pub mod grpc;
pub mod node;
pub mod placement;
pub mod registry;
pub mod shutdown;
pub mod transport;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("placement");
}
