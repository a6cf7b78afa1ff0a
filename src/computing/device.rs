//! About the compute devices the jobs are bound to.
use crate::common::error::*;
use std::fmt;
use std::str::FromStr;





/// One compute device. The identifier is forwarded verbatim to the ML potential.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Device
{
    Cpu,
    Cuda(Option<usize>),
    Mps,
}

impl FromStr for Device
{
    type Err = MdError;

    fn from_str(name: &str) -> Result<Self>
    {
        let name: &str = name.trim();
        match name
        {
            "cpu" => Ok(Device::Cpu),
            "mps" => Ok(Device::Mps),
            "cuda" => Ok(Device::Cuda(None)),
            _ =>
            {
                match name.strip_prefix("cuda:").map(|index| index.parse::<usize>())
                {
                    Some(Ok(index)) => Ok(Device::Cuda(Some(index))),
                    _ => Err(error_config("mace.devices", format!("unknown device '{}' (expected cpu, cuda, cuda:<index>, or mps)", name))),
                }
            },
        }
    }
}

impl fmt::Display for Device
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self
        {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(None) => write!(f, "cuda"),
            Device::Cuda(Some(index)) => write!(f, "cuda:{}", index),
            Device::Mps => write!(f, "mps"),
        }
    }
}





/// The ordered, non-empty list of devices. Job i is bound to device i mod P.
///
/// The same identifier may appear more than once; every entry is a separate worker slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DevicePool
{
    devices: Vec<Device>,
}

impl DevicePool
{
    pub fn new(devices: Vec<Device>) -> Result<Self>
    {
        if devices.is_empty()
        {
            return Err(error_config("mace.devices", "at least one device is required"));
        }
        Ok(DevicePool { devices })
    }

    pub fn from_names(names: &[String]) -> Result<Self>
    {
        let devices: Vec<Device> = names.iter().map(|name| name.parse::<Device>()).collect::<Result<_>>()?;
        Self::new(devices)
    }

    pub fn len(&self) -> usize
    {
        self.devices.len()
    }

    pub fn devices(&self) -> &[Device]
    {
        &self.devices
    }

    /// The device slot of the job at the given batch position
    pub fn slot_for(&self, job_index: usize) -> usize
    {
        job_index % self.devices.len()
    }

    pub fn device_for(&self, job_index: usize) -> &Device
    {
        &self.devices[self.slot_for(job_index)]
    }

    /// Keep only the first `parallel` devices, i.e. cap the number of concurrent workers
    pub fn restrict(&self, parallel: usize) -> Result<Self>
    {
        if parallel == 0
        {
            return Err(error_config("--parallel", "must be at least 1"));
        }
        let keep: usize = parallel.min(self.devices.len());
        Ok(DevicePool { devices: self.devices[..keep].to_vec() })
    }
}





#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn device_names_round_trip()
    {
        for name in ["cpu", "cuda", "cuda:0", "cuda:3", "mps"]
        {
            assert_eq!(name.parse::<Device>().unwrap().to_string(), name);
        }
        assert!(matches!("tpu".parse::<Device>(), Err(MdError::Config { .. })));
        assert!(matches!("cuda:x".parse::<Device>(), Err(MdError::Config { .. })));
    }

    #[test]
    fn jobs_are_bound_round_robin()
    {
        let pool: DevicePool = DevicePool::from_names(&[String::from("cuda:0"), String::from("cuda:1")]).unwrap();
        let bound: Vec<String> = (0..5).map(|i| pool.device_for(i).to_string()).collect();
        assert_eq!(bound, vec!["cuda:0", "cuda:1", "cuda:0", "cuda:1", "cuda:0"]);
    }

    #[test]
    fn empty_pool_is_rejected()
    {
        assert!(matches!(DevicePool::new(Vec::new()), Err(MdError::Config { .. })));
    }

    #[test]
    fn restrict_caps_the_pool()
    {
        let pool: DevicePool = DevicePool::new(vec![Device::Cpu, Device::Mps, Device::Cuda(None)]).unwrap();
        assert_eq!(pool.restrict(2).unwrap().devices(), &[Device::Cpu, Device::Mps]);
        assert_eq!(pool.restrict(9).unwrap().len(), 3);
        assert!(pool.restrict(0).is_err());
    }
}
