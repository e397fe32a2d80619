pub mod exam_timing;
