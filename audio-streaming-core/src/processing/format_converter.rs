/// Channel and sample-rate conversion for a continuous capture stream.
///
/// Capture devices deliver whatever their native format is; everything past
/// the capture callback sees the session's configured format. The resampler
/// is stateful: the source phase and the last input frame carry over from one
/// device buffer to the next, so splitting a stream into callbacks of any size
/// yields the same output as converting it in one piece.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    pub target_sample_rate: u32,
    pub target_channels: u16,
    source_sample_rate: u32,
    /// Position of the next output frame, in units of `1 / target_sample_rate`
    /// source frames, relative to `carry` (or to the buffer start without one).
    phase: u64,
    /// Last frame of the previous buffer, already in the target layout.
    carry: Option<Vec<f32>>,
}

impl FormatConverter {
    pub fn new(target_sample_rate: u32, target_channels: u16) -> Self {
        Self {
            target_sample_rate,
            target_channels,
            source_sample_rate: 0,
            phase: 0,
            carry: None,
        }
    }

    /// Convert one interleaved device buffer to the target format.
    pub fn convert(&mut self, samples: &[f32], source_sample_rate: u32, source_channels: u16) -> Vec<f32> {
        if source_channels == 0 || self.target_channels == 0 || source_sample_rate == 0 {
            return Vec::new();
        }

        if source_sample_rate != self.source_sample_rate {
            if self.source_sample_rate != 0 {
                log::debug!(
                    "Source rate changed {} -> {} Hz, resetting resampler",
                    self.source_sample_rate,
                    source_sample_rate
                );
            }
            self.source_sample_rate = source_sample_rate;
            self.reset();
        }

        let remapped = remap_channels(samples, source_channels as usize, self.target_channels as usize);
        if source_sample_rate == self.target_sample_rate {
            return remapped;
        }
        self.resample(&remapped)
    }

    /// Forget the carried frame and phase, e.g. between streams.
    pub fn reset(&mut self) {
        self.phase = 0;
        self.carry = None;
    }

    /// Linear interpolation over `carry ++ input`, keeping the remainder for
    /// the next call.
    fn resample(&mut self, input: &[f32]) -> Vec<f32> {
        let channels = self.target_channels as usize;
        let input_frames = input.len() / channels;
        if input_frames == 0 {
            return Vec::new();
        }

        let carry = self.carry.as_deref();
        let total_frames = input_frames + usize::from(carry.is_some());

        let step = u64::from(self.source_sample_rate);
        let scale = u64::from(self.target_sample_rate);
        let mut phase = self.phase;
        let mut output = Vec::with_capacity((input_frames as u64 * scale / step + 1) as usize * channels);

        loop {
            let index = (phase / scale) as usize;
            if index + 1 >= total_frames {
                break;
            }
            let fraction = (phase % scale) as f32 / scale as f32;
            let current = frame_at(carry, input, channels, index);
            let next = frame_at(carry, input, channels, index + 1);
            output.extend(
                current
                    .iter()
                    .zip(next)
                    .map(|(a, b)| a + (b - a) * fraction),
            );
            phase += step;
        }

        // Rebase onto the last input frame, which becomes the new carry.
        self.phase = phase - (total_frames as u64 - 1) * scale;
        self.carry = Some(input[(input_frames - 1) * channels..input_frames * channels].to_vec());
        output
    }
}

/// Frame `index` of `carry ++ input`.
fn frame_at<'a>(carry: Option<&'a [f32]>, input: &'a [f32], channels: usize, index: usize) -> &'a [f32] {
    let index = match carry {
        Some(carry) if index == 0 => return carry,
        Some(_) => index - 1,
        None => index,
    };
    &input[index * channels..(index + 1) * channels]
}

/// Map interleaved frames from `from` channels to `to` channels.
///
/// Equal layouts pass through; anything else is averaged to mono and the
/// mono signal is copied to every output channel.
fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        let mono = frame.iter().sum::<f32>() / from as f32;
        out.extend(std::iter::repeat_n(mono, to));
    }
    out
}

/// Quantize f32 samples to signed 16-bit little-endian PCM.
///
/// Out-of-range input saturates at `±i16::MAX`.
pub fn to_s16le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            value.to_le_bytes()
        })
        .collect()
}
