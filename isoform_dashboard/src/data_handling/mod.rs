pub mod demo_subset;
pub mod gtf_segments;
pub mod reference_tables;
pub mod salmon_quant;
