//! Registered sensor sources of one rig

use contracts::SensorSource;
use tracing::{debug, info, instrument};

use crate::collector::SensorStreamCollector;

/// The rig's sensor sources, wired into one collector
///
/// Dropping the set stops every source.
#[derive(Default)]
pub struct SensorSet {
    sources: Vec<Box<dyn SensorSource>>,
}

impl SensorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Box<dyn SensorSource>) {
        debug!(sensor_id = %source.sensor_id(), kind = %source.sensor_kind(), "registered sensor source");
        self.sources.push(source);
    }

    /// Register one callback per source into `collector`
    #[instrument(name = "sensor_set_listen_all", skip_all, fields(count = self.sources.len()))]
    pub fn listen_all(&self, collector: &SensorStreamCollector) {
        for source in &self.sources {
            if !source.is_listening() {
                source.listen(collector.callback(source.sensor_kind()));
            }
        }
        info!("all sensors listening");
    }

    pub fn stop_all(&self) {
        for source in &self.sources {
            if source.is_listening() {
                debug!(sensor_id = %source.sensor_id(), "stopping sensor");
                source.stop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn is_listening(&self, sensor_id: &str) -> bool {
        self.sources
            .iter()
            .any(|s| s.sensor_id() == sensor_id && s.is_listening())
    }
}

impl Drop for SensorSet {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{
        ImageFrame, SensorDataCallback, SensorKind, SensorPayload, SensorReading,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Delivers one RGB frame synchronously on listen
    struct OneShotCamera {
        listening: Arc<AtomicBool>,
        listens: Arc<Mutex<u32>>,
    }

    impl SensorSource for OneShotCamera {
        fn sensor_id(&self) -> &str {
            "rgb.0"
        }

        fn sensor_kind(&self) -> SensorKind {
            SensorKind::Rgb
        }

        fn listen(&self, callback: SensorDataCallback) {
            if self.listening.swap(true, Ordering::SeqCst) {
                return;
            }
            *self.listens.lock().unwrap() += 1;
            callback(SensorReading {
                frame: 1,
                unit: 0,
                payload: SensorPayload::Rgb(ImageFrame {
                    width: 1,
                    height: 1,
                    pixels: Bytes::from_static(&[0, 0, 0, 255]),
                    production_time: 0.05,
                }),
            });
        }

        fn stop(&self) {
            self.listening.store(false, Ordering::SeqCst);
        }

        fn is_listening(&self) -> bool {
            self.listening.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_listen_all_and_drop_stops() {
        let listening = Arc::new(AtomicBool::new(false));
        let listens = Arc::new(Mutex::new(0));
        let collector = SensorStreamCollector::new(1);

        let mut set = SensorSet::new();
        set.register(Box::new(OneShotCamera {
            listening: listening.clone(),
            listens: listens.clone(),
        }));
        set.listen_all(&collector);
        set.listen_all(&collector);

        assert_eq!(*listens.lock().unwrap(), 1);
        assert!(set.is_listening("rgb.0"));
        assert_eq!(collector.delivered(SensorKind::Rgb), 1);

        drop(set);
        assert!(!listening.load(Ordering::SeqCst));
    }
}
