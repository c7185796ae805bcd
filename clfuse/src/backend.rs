//! Runtime collaborators which compile generated kernels and accept their arguments.

pub mod opencl;
