use crate::error::ShapeError;

/// Channels-first shape of a single feature map, `[channels, height, width]`.
///
/// Models compose their stages through this tracer at construction time so that a
/// kernel/stride/upscale combination that cannot produce the configured image size
/// is rejected before any tensor is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Stride-1 convolution with "same" padding.
    pub fn conv_same(
        self,
        stage: &str,
        channels: usize,
        kernel: usize,
    ) -> Result<Self, ShapeError> {
        if kernel % 2 == 0 {
            return Err(ShapeError::Invalid {
                stage: stage.to_string(),
                reason: format!("same padding needs an odd kernel, got {kernel}"),
            });
        }
        Ok(Self { channels, ..self })
    }

    /// Convolution with explicit symmetric padding.
    pub fn conv(
        self,
        stage: &str,
        channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
    ) -> Result<Self, ShapeError> {
        let padded = [self.height + 2 * padding, self.width + 2 * padding];
        if stride == 0 || kernel == 0 || padded[0] < kernel || padded[1] < kernel {
            return Err(ShapeError::Kernel {
                stage: stage.to_string(),
                kernel,
                size: [self.height, self.width],
            });
        }

        Ok(Self {
            channels,
            height: (padded[0] - kernel) / stride + 1,
            width: (padded[1] - kernel) / stride + 1,
        })
    }

    /// Sub-pixel rearrangement trading `factor^2` channels for a `factor` spatial upscale.
    pub fn pixel_shuffle(self, stage: &str, factor: usize) -> Result<Self, ShapeError> {
        let area = factor * factor;
        if factor == 0 || self.channels % area != 0 {
            return Err(ShapeError::Shuffle {
                stage: stage.to_string(),
                channels: self.channels,
                factor,
            });
        }

        Ok(Self {
            channels: self.channels / area,
            height: self.height * factor,
            width: self.width * factor,
        })
    }

    /// Non-overlapping pooling; the spatial size has to divide exactly.
    pub fn pool(self, stage: &str, factor: usize) -> Result<Self, ShapeError> {
        if factor == 0 || self.height % factor != 0 || self.width % factor != 0 {
            return Err(ShapeError::Indivisible {
                stage: stage.to_string(),
                size: [self.height, self.width],
                factor,
            });
        }

        Ok(Self {
            height: self.height / factor,
            width: self.width / factor,
            ..self
        })
    }

    pub fn expect(self, stage: &str, expected: FeatureShape) -> Result<Self, ShapeError> {
        if self != expected {
            return Err(ShapeError::Mismatch {
                stage: stage.to_string(),
                expected: expected.dims(),
                actual: self.dims(),
            });
        }
        Ok(self)
    }
}
