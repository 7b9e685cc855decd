//! End-to-end scenarios over the whole coordinator with mocked chains,
//! wallet and committee.

mod rpc_auth;
