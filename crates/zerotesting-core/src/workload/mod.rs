//! Layered workload configs.
//!
//! `StatefulGroupConfig` ⊃ `StatefulGroupSpecConfig` ⊃ `PodTemplateSpecConfig`
//! ⊃ `PodSpecConfig` ⊃ `ContainerConfig`. Each layer is mutated through
//! setters that take an explicit collision policy and is frozen into a
//! Kubernetes object by `build()`.

pub mod container;
pub mod path;
pub mod pod_spec;
pub mod pod_template;
pub mod stateful_group;

pub use container::{env_field, env_value, resources, ContainerConfig, Image, PullPolicy};
pub use path::{
    find_container, find_container_mut, get_config, get_config_mut, with_container_command_args,
    ConfigPath,
};
pub use pod_spec::PodSpecConfig;
pub use pod_template::{PodTemplateSpecConfig, APP_LABEL, TEMPLATE_HASH_ANNOTATION};
pub use stateful_group::{PodManagementPolicy, StatefulGroupConfig, StatefulGroupSpecConfig};
