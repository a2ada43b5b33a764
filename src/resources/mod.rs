pub mod catalog;
pub mod common;
pub mod template;

pub use catalog::{
    GLOBAL_RESTRICTED, GLOBAL_UNRESTRICTED, NamespacedBinding, PolicyDefinition, PolicyName,
    SYSTEM_UNRESTRICTED, render_node_binding,
};
pub use common::{
    ANNOTATION_BASE, FIELD_MANAGER, KUBE_SYSTEM, NODE_BINDING_NAME, RESOLVED, annotation_key,
};
