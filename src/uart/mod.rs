use std::time::Duration;

use async_trait::async_trait;
use common::{PortInfo, WledCommand};
use log::{debug, error, info};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};

use crate::error::BridgeError;

pub const UART_BAUD: u32 = 115_200;

/// One write in a persistent session, sent `delay` after the previous one
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStep {
    pub delay: Duration,
    pub label: String,
    pub command: WledCommand,
}

/// Everything the bridge needs from the serial side
#[async_trait]
pub trait Transport: Send + Sync {
    /// Path of the configured device, also used to key pending reverts
    fn device(&self) -> &str;

    /// Open the configured device, write one command line and close it again
    async fn send(&self, command: &WledCommand) -> Result<(), BridgeError>;

    /// Keep `path` open across all `steps`. Lines the device sends back are
    /// logged while the session lasts.
    async fn run_session(&self, path: &str, steps: Vec<SessionStep>) -> Result<(), BridgeError>;

    fn list_ports(&self) -> Result<Vec<PortInfo>, BridgeError>;
}

pub struct SerialTransport {
    path: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
        }
    }

    fn open(&self, path: &str) -> Result<SerialStream, BridgeError> {
        let port = tokio_serial::new(path, self.baud_rate).open_native_async()?;
        debug!("Serial port {} opened at {} baud", path, self.baud_rate);
        Ok(port)
    }
}

async fn write_command<W>(port: &mut W, command: &WledCommand) -> Result<String, BridgeError>
where
    W: AsyncWrite + Unpin,
{
    let line = command.to_line()?;
    port.write_all(line.as_bytes()).await?;
    port.flush().await?;
    Ok(line)
}

#[async_trait]
impl Transport for SerialTransport {
    fn device(&self) -> &str {
        &self.path
    }

    async fn send(&self, command: &WledCommand) -> Result<(), BridgeError> {
        let mut port = self.open(&self.path)?;

        match write_command(&mut port, command).await {
            Ok(line) => {
                info!("Sent to {}: {}", self.path, line.trim_end());
                Ok(())
            }
            Err(e) => {
                error!("Error on write to {}: {}", self.path, e);
                Err(e)
            }
        }
    }

    async fn run_session(&self, path: &str, steps: Vec<SessionStep>) -> Result<(), BridgeError> {
        let port = self.open(path)?;
        let (reader, mut writer) = tokio::io::split(port);

        // Log whatever the controller answers for as long as the session is open
        let device = path.to_string();
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => info!("Received data from {}: {}", device, line.trim_end()),
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Stopped reading from {}: {}", device, e);
                        break;
                    }
                }
            }
        });

        let mut result = Ok(());
        for step in steps {
            tokio::time::sleep(step.delay).await;

            match write_command(&mut writer, &step.command).await {
                Ok(line) => info!("Changed color to {}: {}", step.label, line.trim_end()),
                Err(e) => {
                    error!("Error on write of {} to {}: {}", step.label, path, e);
                    result = Err(e);
                    break;
                }
            }
        }

        reader_handle.abort();
        debug!("Serial session on {} closed", path);
        result
    }

    fn list_ports(&self) -> Result<Vec<PortInfo>, BridgeError> {
        list_ports()
    }
}

/// Enumerate the serial ports on this host
pub fn list_ports() -> Result<Vec<PortInfo>, BridgeError> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| BridgeError::PortEnumeration(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let mut info = PortInfo {
                path: port.port_name,
                port_type: String::new(),
                manufacturer: None,
                serial_number: None,
                product: None,
                vendor_id: None,
                product_id: None,
            };

            let port_type = match port.port_type {
                SerialPortType::UsbPort(usb) => {
                    info.manufacturer = usb.manufacturer;
                    info.serial_number = usb.serial_number;
                    info.product = usb.product;
                    info.vendor_id = Some(format!("{:04x}", usb.vid));
                    info.product_id = Some(format!("{:04x}", usb.pid));
                    "usb"
                }
                SerialPortType::PciPort => "pci",
                SerialPortType::BluetoothPort => "bluetooth",
                SerialPortType::Unknown => "unknown",
            };
            info.port_type = port_type.to_string();

            info
        })
        .collect())
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::*;

    /// What a [`RecordingTransport`] saw, in order
    #[derive(Clone, Debug, PartialEq)]
    pub struct Sent {
        pub at: Instant,
        pub path: String,
        pub command: WledCommand,
    }

    /// Stands in for the serial device and remembers every write
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        pub path: String,
        pub sent: Arc<Mutex<Vec<Sent>>>,
        pub ports: Vec<PortInfo>,
        pub fail_listing: bool,
    }

    impl RecordingTransport {
        pub fn new(path: &str) -> Self {
            Self {
                path: path.to_string(),
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, path: &str, command: &WledCommand) {
            self.sent.lock().unwrap().push(Sent {
                at: Instant::now(),
                path: path.to_string(),
                command: command.clone(),
            });
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn device(&self) -> &str {
            &self.path
        }

        async fn send(&self, command: &WledCommand) -> Result<(), BridgeError> {
            self.record(&self.path, command);
            Ok(())
        }

        async fn run_session(
            &self,
            path: &str,
            steps: Vec<SessionStep>,
        ) -> Result<(), BridgeError> {
            for step in steps {
                tokio::time::sleep(step.delay).await;
                self.record(path, &step.command);
            }
            Ok(())
        }

        fn list_ports(&self) -> Result<Vec<PortInfo>, BridgeError> {
            if self.fail_listing {
                return Err(BridgeError::PortEnumeration("no serial backend".to_string()));
            }
            Ok(self.ports.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wled::{color_command, revert_command};
    use common::Color;

    #[tokio::test]
    async fn test_write_command_is_one_line() {
        let mut buffer: Vec<u8> = Vec::new();
        let line = write_command(&mut buffer, &revert_command()).await.unwrap();

        assert_eq!(buffer, line.as_bytes());
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn test_send_to_missing_device_fails() {
        let transport = SerialTransport::new("/dev/wled-bridge-does-not-exist", UART_BAUD);
        let result = transport.send(&color_command(Color::new(1, 2, 3))).await;
        assert!(matches!(result, Err(BridgeError::Serial(_))));
    }

    #[tokio::test]
    async fn test_session_on_missing_device_fails() {
        let transport = SerialTransport::new("/dev/null", UART_BAUD);
        let steps = vec![SessionStep {
            delay: Duration::ZERO,
            label: "Red".to_string(),
            command: color_command(Color::new(255, 0, 0)),
        }];
        let result = transport
            .run_session("/dev/wled-bridge-does-not-exist", steps)
            .await;
        assert!(result.is_err());
    }
}
