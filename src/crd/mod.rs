mod pod_security_policy;

pub use pod_security_policy::*;
