pub mod dapr {
    tonic::include_proto!("dapr.proto.runtime.v1");
}
