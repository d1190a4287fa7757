pub mod aggregation;
pub mod clustering;
pub mod figures;
pub mod pivot;
