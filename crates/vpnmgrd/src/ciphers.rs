//! Platform-supported cipher filtering.
//!
//! Configured cipher lists are intersected with the platform-supported
//! lists before config generation. The supported lists are priority
//! ordered; the filtered result keeps that order, not the configured
//! order. An empty configured list means "use everything supported".

use tracing::warn;

use crate::types::{DhGroup, EncAlg, IntegAlg};

/// Supported encryption algorithms, strongest first.
pub const SUPPORTED_ENC: &[EncAlg] = &[EncAlg::Aes256, EncAlg::Aes128, EncAlg::Des3];

/// Supported integrity algorithms, strongest first.
pub const SUPPORTED_INTEG: &[IntegAlg] = &[IntegAlg::Sha256, IntegAlg::Sha1, IntegAlg::Md5];

/// Supported Diffie-Hellman groups, strongest first.
pub const SUPPORTED_DH: &[DhGroup] = &[DhGroup::Group14, DhGroup::Group5, DhGroup::Group2];

fn filter_supported<T: PartialEq + Copy>(configured: &[T], supported: &[T]) -> Vec<T> {
    supported
        .iter()
        .filter(|alg| configured.is_empty() || configured.contains(alg))
        .copied()
        .collect()
}

/// Filters encryption algorithms against the supported list.
pub fn filter_enc(configured: &[EncAlg]) -> Vec<EncAlg> {
    let filtered = filter_supported(configured, SUPPORTED_ENC);
    if filtered.is_empty() {
        warn!("None of the configured encryption algorithms is supported");
    }
    filtered
}

/// Filters integrity algorithms against the supported list.
pub fn filter_integ(configured: &[IntegAlg]) -> Vec<IntegAlg> {
    let filtered = filter_supported(configured, SUPPORTED_INTEG);
    if filtered.is_empty() {
        warn!("None of the configured integrity algorithms is supported");
    }
    filtered
}

/// Filters Diffie-Hellman groups against the supported list.
pub fn filter_dh(configured: &[DhGroup]) -> Vec<DhGroup> {
    let filtered = filter_supported(configured, SUPPORTED_DH);
    if filtered.is_empty() {
        warn!("None of the configured Diffie-Hellman groups is supported");
    }
    filtered
}
