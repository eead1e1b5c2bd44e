pub const RMP_DISPLAY_VERSION: &str = env!("RMP_DISPLAY_VERSION");
pub const RMP_BUILD_N: &str = env!("RMP_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "rna-map-processing {}\nBuild {}\nProtocol {}\nMaP sequencing post-processing and Mg2+ titration fitting",
        RMP_DISPLAY_VERSION,
        RMP_BUILD_N,
        rmp_protocol::PROTOCOL_VERSION
    )
}
