use thiserror::Error;

/// Failure while refreshing a single particle source.
#[derive(Error, Debug)]
pub enum RefreshError {
    /// The simulation's bake call failed
    #[error("failed to bake {layer} geometry")]
    Bake {
        layer: BakeLayer,
        #[source]
        source: anyhow::Error,
    },

    /// A bake was attempted while no pool lease was held
    #[error("scratch mesh pool is not allocated")]
    PoolUnavailable,
}

/// Which part of a particle system was being baked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakeLayer {
    Particles,
    Trails,
}

impl std::fmt::Display for BakeLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BakeLayer::Particles => write!(f, "particle"),
            BakeLayer::Trails => write!(f, "trail"),
        }
    }
}

/// Invalid source configuration.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("scale must be finite, got {0:?}")]
    NonFiniteScale([f32; 3]),

    #[error("animatable property {index} has an empty name")]
    EmptyPropertyName { index: usize },
}
