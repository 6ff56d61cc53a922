pub mod docker_engine;
pub mod in_memory;
pub mod rancher_v1;
pub mod rancher_v2;
