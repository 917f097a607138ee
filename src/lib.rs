// Institutional Flow - quote-pressure windows and volume-anomaly signals
// for futures-options chains
//
// Layers:
//   core   - types, config, logging, signal bus
//   layer1 - ingestion glue (feed records, symbol resolution, replay)
//   layer2 - quote-pressure windowing (window store, confidence, adapter, reaper, pipeline)
//   layer3 - signal detection (coordination, volume spikes, audit log)

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;
