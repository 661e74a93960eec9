//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{DeviceConnector, DeviceSelector, TransportError, UsbTransport};
use crate::protocol::constants::{ACK_SIZE, SAMSUNG_VENDOR_ID};

/// Mock transport for unit testing protocol and session logic.
///
/// Clones share their queues, so a test can keep one handle for
/// inspection while the engine owns another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued responses to return on read.
    response_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            response_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            vid: SAMSUNG_VENDOR_ID,
            pid: 0x685D,
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue a raw response to be returned on next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.response_queue
            .lock()
            .unwrap()
            .push_back(bytes.to_vec());
    }

    /// Queue a 16-byte acknowledgment built from four words.
    pub fn queue_ack_words(&self, words: [u32; 4]) {
        let mut bytes = Vec::with_capacity(ACK_SIZE);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        self.queue_response(&bytes);
    }

    /// Queue an accepting acknowledgment.
    pub fn queue_ack(&self) {
        self.queue_ack_words([0, 0, 0, 0]);
    }

    /// Queue a rejecting acknowledgment with the given status word.
    pub fn queue_nak(&self, code: u32) {
        self.queue_ack_words([code, 0, 0, 0]);
    }

    /// Number of responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.response_queue.lock().unwrap().len()
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut bytes = self
            .response_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })?;
        bytes.truncate(max_len);
        Ok(bytes)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

/// Connector that hands out clones of a single mock device.
#[derive(Clone, Default)]
pub struct MockConnector {
    device: Arc<Mutex<Option<MockTransport>>>,
}

impl MockConnector {
    /// Connector with no device attached.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Connector with `device` attached.
    pub fn with_device(device: MockTransport) -> Self {
        let connector = Self::default();
        connector.attach(device);
        connector
    }

    pub fn attach(&self, device: MockTransport) {
        *self.device.lock().unwrap() = Some(device);
    }

    pub fn detach(&self) {
        *self.device.lock().unwrap() = None;
    }
}

impl DeviceConnector for MockConnector {
    type Transport = MockTransport;

    fn open(&self, selector: &DeviceSelector) -> Result<MockTransport, TransportError> {
        let (vid, pid) = selector.ids();
        match self.device.lock().unwrap().as_ref() {
            Some(dev) if selector.matches(dev.vendor_id(), dev.product_id()) => {
                if dev.is_connected() {
                    Ok(dev.clone())
                } else {
                    Err(TransportError::OpenFailed("device stopped responding".to_string()))
                }
            }
            _ => Err(TransportError::DeviceNotFound { vid, pid }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(5000);

    #[test]
    fn test_mock_response_queue() {
        let mock = MockTransport::new();
        mock.queue_ack();
        mock.queue_nak(7);

        let first = mock.read(ACK_SIZE, T).unwrap();
        assert_eq!(first, vec![0u8; 16]);

        let second = mock.read(ACK_SIZE, T).unwrap();
        assert_eq!(&second[..4], &7u32.to_le_bytes());

        // Queue is empty now
        assert!(matches!(
            mock.read(ACK_SIZE, T),
            Err(TransportError::Timeout { timeout_ms: 5000 })
        ));
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.write(b"Hello").unwrap();
        mock.write_all(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write(b"test").is_err());
    }

    #[test]
    fn test_connector_opens_attached_device() {
        let mock = MockTransport::new();
        let connector = MockConnector::with_device(mock.clone());
        let opened = connector.open(&DeviceSelector::Any).unwrap();

        opened.write(b"ping").unwrap();
        assert_eq!(mock.get_writes(), vec![b"ping".to_vec()]);

        connector.detach();
        assert!(matches!(
            connector.open(&DeviceSelector::Any),
            Err(TransportError::DeviceNotFound { .. })
        ));
    }
}
