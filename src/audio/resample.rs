use anyhow::{bail, Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

const CHUNK_SIZE: usize = 1024;

/// Streaming mono resampler
///
/// Input may arrive in blocks of any size. Samples are buffered until a full
/// resampler chunk is available. The filter delay is trimmed from the front of
/// the output so sample `n` of the output lines up with input time
/// `n / output_rate`; `flush` drains the tail so the total output length is
/// the input length scaled by the rate ratio.
pub struct AudioResampler {
    resampler: SincFixedIn<f32>,
    input_rate: u32,
    output_rate: u32,
    pending: Vec<f32>,
    /// Output frames still to drop before real signal starts
    skip: usize,
    fed: usize,
    produced: usize,
}

impl AudioResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            bail!("Sample rates must be greater than 0");
        }

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            2.0,
            params,
            CHUNK_SIZE,
            1,
        )
        .context("Failed to create resampler")?;
        let skip = resampler.output_delay();

        debug!(
            "Created resampler: {} Hz -> {} Hz (delay {} frames)",
            input_rate, output_rate, skip
        );

        Ok(Self {
            resampler,
            input_rate,
            output_rate,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            skip,
            fed: 0,
            produced: 0,
        })
    }

    /// Feed samples, returning whatever output is ready
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        self.fed += input.len();

        let mut output = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            output.extend(self.run(chunk)?);
        }

        self.produced += output.len();
        Ok(output)
    }

    /// Drain buffered samples and the filter tail
    ///
    /// Afterwards the resampler is back in its initial state.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let target = (self.fed as f64 * self.ratio()).round() as usize;
        let wanted = target.saturating_sub(self.produced);

        let mut output = Vec::with_capacity(wanted);
        let mut chunk = std::mem::take(&mut self.pending);
        while wanted > output.len() {
            chunk.resize(CHUNK_SIZE, 0.0);
            output.extend(self.run(std::mem::take(&mut chunk))?);
        }
        output.truncate(wanted);

        self.resampler.reset();
        self.skip = self.resampler.output_delay();
        self.fed = 0;
        self.produced = 0;

        Ok(output)
    }

    fn run(&mut self, chunk: Vec<f32>) -> Result<Vec<f32>> {
        let mut out = self
            .resampler
            .process(&[chunk], None)
            .context("Resampling failed")?;
        let mut out = std::mem::take(&mut out[0]);

        let skip = self.skip.min(out.len());
        out.drain(..skip);
        self.skip -= skip;

        Ok(out)
    }

    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

/// Resample a whole buffer in one go
pub fn resample_mono(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }

    let mut resampler = AudioResampler::new(input_rate, output_rate)?;
    let mut output = resampler.process(input)?;
    output.extend(resampler.flush()?);
    Ok(output)
}
