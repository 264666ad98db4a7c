pub mod allocator;

pub use allocator::{
    allocate, groupable_label_keys, label_costs, namespace_costs, workload_costs, CostAllocation,
    LabelValueCost, NamespaceCost, WorkloadCost,
};
