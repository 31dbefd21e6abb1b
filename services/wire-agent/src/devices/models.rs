//! Adapter models the emulator knows how to install.

/// An adapter model and its port count.
#[derive(Debug, PartialEq, Eq)]
pub struct AdapterModel {
    /// Name as understood by the emulator.
    pub name: &'static str,
    /// Number of ethernet ports on the adapter.
    pub ports: u8,
}

static ADAPTER_MODELS: &[AdapterModel] = &[
    AdapterModel { name: "PA-FE-TX", ports: 1 },
    AdapterModel { name: "PA-4E", ports: 4 },
    AdapterModel { name: "PA-8E", ports: 8 },
    AdapterModel { name: "PA-GE", ports: 1 },
    AdapterModel { name: "NM-1FE-TX", ports: 1 },
    AdapterModel { name: "NM-4E", ports: 4 },
    AdapterModel { name: "NM-16ESW", ports: 16 },
    AdapterModel { name: "GT96100-FE", ports: 2 },
];

/// Look up an adapter model by name (case-insensitive).
pub fn adapter_model(name: &str) -> Option<&'static AdapterModel> {
    ADAPTER_MODELS
        .iter()
        .find(|model| model.name.eq_ignore_ascii_case(name))
}

/// All known adapter models.
pub fn adapter_models() -> &'static [AdapterModel] {
    ADAPTER_MODELS
}
