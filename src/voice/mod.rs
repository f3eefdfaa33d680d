//! Capa de voz: gateway, handshake con reintentos, supervisor por
//! guild y watchdog.

pub mod gateway;
pub mod handshake;
pub mod supervisor;
pub mod watchdog;

#[cfg(test)]
pub mod test_support;
