//! Transport layers exposing the mutation protocol

pub mod http;
