/// Fixed delay applied to one audio or CV edge so that signals arriving over
/// paths with different latency line up at the summing input.
///
/// Storage is sized when the schedule is built; processing never allocates.
#[derive(Debug)]
pub(crate) struct DelayCompensator {
    buffer: Vec<f32>,
    write_position: usize,
    delay_samples: usize,
}

impl DelayCompensator {
    pub fn new(delay_samples: usize) -> Self {
        let capacity = delay_samples.max(1);
        Self {
            buffer: vec![0.0; capacity],
            write_position: 0,
            delay_samples,
        }
    }

    /// Adds the delayed `input`, scaled by `gain`, onto `output`.
    pub fn mix_into(&mut self, input: &[f32], output: &mut [f32], gain: f32) {
        if self.delay_samples == 0 {
            for (out, sample) in output.iter_mut().zip(input) {
                *out += sample * gain;
            }
            return;
        }

        let capacity = self.buffer.len();
        let mut position = self.write_position;
        for (out, sample) in output.iter_mut().zip(input) {
            // The slot about to be overwritten holds the sample from exactly
            // `delay_samples` frames ago.
            let delayed = self.buffer[position];
            self.buffer[position] = *sample;
            *out += delayed * gain;

            position += 1;
            if position == capacity {
                position = 0;
            }
        }
        self.write_position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_is_shifted_across_blocks() {
        let mut delay = DelayCompensator::new(6);
        let mut out = vec![0.0; 4];
        let mut first = vec![0.0; 4];
        first[1] = 1.0;
        delay.mix_into(&first, &mut out, 1.0);
        assert_eq!(out, vec![0.0; 4]);

        let mut out = vec![0.0; 4];
        delay.mix_into(&[0.0; 4], &mut out, 0.5);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.5]);
        assert_eq!(delay.write_position, 2);
    }

    #[test]
    fn zero_delay_is_a_plain_mix() {
        let mut delay = DelayCompensator::new(0);
        let mut out = vec![1.0; 3];
        delay.mix_into(&[1.0, 2.0, 3.0], &mut out, 2.0);
        assert_eq!(out, vec![3.0, 5.0, 7.0]);
    }
}
