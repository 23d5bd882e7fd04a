mod common;
mod data;
mod edge;
mod handshake;
mod pake;
mod resumption;
