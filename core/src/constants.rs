//! Signing node endpoint paths and Bitcoin output limits.

pub const DKG_ROUND1_PATH: &str = "/pyfrost/v1/dkg/round1";
pub const DKG_ROUND2_PATH: &str = "/pyfrost/v1/dkg/round2";
pub const DKG_ROUND3_PATH: &str = "/pyfrost/v1/dkg/round3";
pub const SIGN_PATH: &str = "/pyfrost/v1/sign";
pub const GENERATE_NONCES_PATH: &str = "/pyfrost/v1/generate-nonces";

/// Paths an allow-listed caller may reach on a signing node.
pub const NODE_ENDPOINT_PATHS: [&str; 5] = [
    DKG_ROUND1_PATH,
    DKG_ROUND2_PATH,
    DKG_ROUND3_PATH,
    SIGN_PATH,
    GENERATE_NONCES_PATH,
];

/// Outputs below this value are not created.
pub const DUST_LIMIT_SATS: u64 = 546;
