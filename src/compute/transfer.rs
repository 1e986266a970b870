use tracing::trace;

use crate::{tensor::Tensor, utils::error::EngineError};

/// How a producer's result may be handed to one consumer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferPolicy {
    pub consumer_accepts_accelerated: bool,
    pub producer_pipelined: bool,
    /// Some producer feeding the consumer also feeds another node.
    pub shared: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferAction {
    Download,
    HostCopy,
    DeviceDuplicate,
    PassThrough,
}

impl TransferPolicy {
    pub fn action_for(&self, tensor: &Tensor) -> TransferAction {
        let accelerated = tensor.is_accelerated();
        if accelerated && (!self.consumer_accepts_accelerated || !self.producer_pipelined) {
            TransferAction::Download
        } else if !accelerated && self.shared {
            TransferAction::HostCopy
        } else if accelerated && self.shared {
            TransferAction::DeviceDuplicate
        } else {
            TransferAction::PassThrough
        }
    }
}

/// Produce the tensor a consumer receives for one inbound edge.
///
/// Downloading already yields a fresh host buffer, so a shared accelerated
/// input that has to come back to the host is not copied a second time.
pub fn prepare_input(
    consumer: &str,
    tensor: Tensor,
    policy: TransferPolicy,
) -> Result<Tensor, EngineError> {
    let action = policy.action_for(&tensor);
    trace!(consumer, ?action, shape = ?tensor.shape(), "prepare input");
    match action {
        TransferAction::Download => tensor.to_host(),
        TransferAction::HostCopy | TransferAction::DeviceDuplicate => tensor.duplicate(),
        TransferAction::PassThrough => Ok(tensor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{AcceleratedBackend, EmulatedBackend};

    fn policy(accepts: bool, pipelined: bool, shared: bool) -> TransferPolicy {
        TransferPolicy {
            consumer_accepts_accelerated: accepts,
            producer_pipelined: pipelined,
            shared,
        }
    }

    fn device_tensor(backend: &dyn AcceleratedBackend) -> Tensor {
        Tensor::new(vec![1, 3], vec![1.0, 2.0, 3.0])
            .unwrap()
            .to_accelerated(backend)
            .unwrap()
    }

    #[test]
    fn accelerated_goes_host_unless_pipelined_and_accepted() {
        let backend = EmulatedBackend::new(1 << 20);
        let t = device_tensor(&backend);
        assert_eq!(policy(false, true, false).action_for(&t), TransferAction::Download);
        assert_eq!(policy(true, false, false).action_for(&t), TransferAction::Download);
        assert_eq!(policy(true, true, false).action_for(&t), TransferAction::PassThrough);
        assert_eq!(policy(true, true, true).action_for(&t), TransferAction::DeviceDuplicate);

        let host = prepare_input("c", t, policy(false, true, true)).unwrap();
        assert!(host.is_host());
        assert_eq!(host.host_slice().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn shared_host_tensor_is_copied() {
        let t = Tensor::new(vec![2], vec![1.0, 2.0]).unwrap();
        let copy = prepare_input("c", t.clone(), policy(false, false, true)).unwrap();
        assert!(!copy.shares_storage_with(&t));

        let moved = prepare_input("c", t.clone(), policy(false, false, false)).unwrap();
        assert!(moved.shares_storage_with(&t));
    }

    #[test]
    fn device_duplicate_keeps_actual_shape() {
        let backend = EmulatedBackend::new(1 << 20);
        let t = device_tensor(&backend);
        let dup = prepare_input("c", t.clone(), policy(true, true, true)).unwrap();
        assert!(dup.is_accelerated());
        assert!(!dup.shares_storage_with(&t));
        assert_eq!(dup.to_host().unwrap().host_slice().unwrap(), &[1.0, 2.0, 3.0]);
    }
}
