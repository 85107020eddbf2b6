use std::fmt;
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub supports_negative_prompt: bool,
    pub nsfw: bool,
}

impl ModelDescriptor {
    const fn new(
        id: &'static str,
        display_name: &'static str,
        supports_negative_prompt: bool,
        nsfw: bool,
    ) -> Self {
        Self { id, display_name, supports_negative_prompt, nsfw }
    }
}

const PERSONAL_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor::new("stabilityai/stable-diffusion-2", "Stable Diffusion 2", true, false),
    ModelDescriptor::new("runwayml/stable-diffusion-v1-5", "Stable Diffusion 1.5", true, false),
    ModelDescriptor::new("CompVis/stable-diffusion-v1-4", "Stable Diffusion 1.4", true, false),
    ModelDescriptor::new("black-forest-labs/FLUX.1-dev", "FLUX.1", false, false),
];

const HOSTED_MODELS: &[ModelDescriptor] = &[
    ModelDescriptor::new("black-forest-labs/FLUX.1-schnell", "FLUX.1 [schnell]", false, false),
    ModelDescriptor::new("black-forest-labs/FLUX.1-dev", "FLUX.1 [dev]", false, false),
    ModelDescriptor::new(
        "stabilityai/stable-diffusion-xl-base-1.0",
        "Stable Diffusion XL",
        true,
        false,
    ),
    ModelDescriptor::new("UnfilteredAI/NSFW-gen-v2", "NSFW Gen v2", true, true),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edition {
    /// Credential typed in by the user, no request quota.
    Personal,
    /// Credential from deployment config, request quota and NSFW confirmation.
    Hosted,
}

impl Edition {
    pub const fn catalog(self) -> Catalog {
        match self {
            Self::Personal => Catalog(PERSONAL_MODELS),
            Self::Hosted => Catalog(HOSTED_MODELS),
        }
    }
}

impl FromStr for Edition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(Self::Personal),
            "hosted" => Ok(Self::Hosted),
            other => Err(format!("unknown edition {other:?}")),
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Personal => "personal",
            Self::Hosted => "hosted",
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Catalog(&'static [ModelDescriptor]);

impl Catalog {
    pub const fn models(self) -> &'static [ModelDescriptor] {
        self.0
    }

    pub fn get(self, id: &str) -> Option<&'static ModelDescriptor> {
        self.0.iter().find(|model| model.id == id)
    }

    pub const fn default_model(self) -> &'static ModelDescriptor {
        &self.0[0]
    }
}
