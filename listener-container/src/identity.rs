use parking_lot::RwLock;

pub const DEFAULT_CONTAINER_NAME: &str = "noBeanNameSet";

/// Names and metadata identifying a container. Settable until the container
/// is started; the name doubles as the listener id.
pub struct ContainerIdentity {
    name: RwLock<String>,
    main_listener_id: RwLock<Option<String>>,
    listener_info: RwLock<Option<Vec<u8>>>,
}

impl Default for ContainerIdentity {
    fn default() -> Self {
        Self {
            name: RwLock::new(DEFAULT_CONTAINER_NAME.to_string()),
            main_listener_id: RwLock::new(None),
            listener_info: RwLock::new(None),
        }
    }
}

impl ContainerIdentity {
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn listener_id(&self) -> String {
        self.name()
    }

    /// For retry-topic containers, the id of the listener they retry for.
    pub fn main_listener_id(&self) -> Option<String> {
        self.main_listener_id.read().clone()
    }

    pub fn set_main_listener_id(&self, id: Option<&str>) {
        *self.main_listener_id.write() = id.map(str::to_string);
    }

    /// Opaque bytes attached to the listener. Returned as a copy.
    pub fn listener_info(&self) -> Option<Vec<u8>> {
        self.listener_info.read().clone()
    }

    pub fn set_listener_info(&self, info: Option<&[u8]>) {
        *self.listener_info.write() = info.map(<[u8]>::to_vec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let identity = ContainerIdentity::default();
        assert_eq!(identity.name(), "noBeanNameSet");
        assert_eq!(identity.listener_id(), identity.name());
        assert!(identity.main_listener_id().is_none());
        assert!(identity.listener_info().is_none());
    }

    #[test]
    fn listener_info_is_copied_in_and_out() {
        let identity = ContainerIdentity::default();
        let mut info = b"origin".to_vec();
        identity.set_listener_info(Some(&info));
        info[0] = b'X';

        let mut out = identity.listener_info().unwrap();
        assert_eq!(out, b"origin");
        out[0] = b'Y';
        assert_eq!(identity.listener_info().unwrap(), b"origin");

        identity.set_listener_info(None);
        assert!(identity.listener_info().is_none());
    }
}
