pub mod psi;
