//! Fee computation and size estimation
//!
//! Sizes are estimated for legacy P2PKH spends: 148 bytes per input
//! (outpoint, sequence and a ~107 byte scriptSig) and the exact serialized
//! size of each output.

/// Version + locktime + input/output counts
pub const TX_OVERHEAD: usize = 10;
pub const P2PKH_INPUT_SIZE: usize = 148;
pub const P2PKH_OUTPUT_SIZE: usize = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeePolicy {
    /// Satoshis per 1000 bytes of estimated size
    PerKb(u64),
    /// Flat fee per transaction
    Fixed(u64),
}

impl FeePolicy {
    pub fn fee_for_size(&self, size: usize) -> u64 {
        match self {
            FeePolicy::PerKb(rate) => (size as u64 * rate).div_ceil(1000),
            FeePolicy::Fixed(fee) => *fee,
        }
    }
}

/// Serialized size of an output with the given script length
pub fn output_size(script_len: usize) -> usize {
    8 + varint_len(script_len) + script_len
}

fn varint_len(n: usize) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Shape of a transaction whose payment inputs are still being chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxShape {
    /// Sizes of inputs fixed up front (e.g. the ordinal being moved)
    pub fixed_inputs: Vec<usize>,
    /// Sizes of every output, change included
    pub outputs: Vec<usize>,
}

impl TxShape {
    pub fn new(fixed_inputs: Vec<usize>, outputs: Vec<usize>) -> Self {
        Self {
            fixed_inputs,
            outputs,
        }
    }

    pub fn estimate_size(&self, payment_inputs: usize) -> usize {
        TX_OVERHEAD
            + self.fixed_inputs.iter().sum::<usize>()
            + payment_inputs * P2PKH_INPUT_SIZE
            + self.outputs.iter().sum::<usize>()
    }

    pub fn fee(&self, policy: &FeePolicy, payment_inputs: usize) -> u64 {
        policy.fee_for_size(self.estimate_size(payment_inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_size() {
        // 1 input, 2 outputs
        let shape = TxShape::new(vec![], vec![P2PKH_OUTPUT_SIZE, P2PKH_OUTPUT_SIZE]);
        assert_eq!(shape.estimate_size(1), 10 + 148 + 68);
        assert_eq!(output_size(25), P2PKH_OUTPUT_SIZE);
    }

    #[test]
    fn test_fee_policies() {
        assert_eq!(FeePolicy::PerKb(50).fee_for_size(226), 12);
        assert_eq!(FeePolicy::PerKb(1000).fee_for_size(226), 226);
        assert_eq!(FeePolicy::Fixed(150).fee_for_size(10_000), 150);
    }
}
