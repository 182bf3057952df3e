pub mod color_ramp;
pub mod isoform_join;
pub mod isoform_plot;
