//! Relation descriptors, classification and eager-load requests

pub mod classifier;
pub mod descriptor;
pub mod spec;

pub use classifier::{classify, kind_of};
pub use descriptor::{MorphConfig, PivotConfig, PivotMorph, RelationDescriptor, ThroughConfig};
pub use spec::{
    AggregateFunction, AggregateSpec, ColumnSelection, CountSpec, RelationKind, RelationSpec,
};
