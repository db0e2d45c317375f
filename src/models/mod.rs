pub mod policy;

pub use policy::AllocationPolicy;
