// RC4 is small enough to carry here instead of pulling in an unmaintained crate.
pub struct Rc4 {
    initial_state: [u8; 256],
}

impl Rc4 {
    /// Key schedule. Keys longer than 256 bytes only use their first 256 bytes.
    pub fn new<Key: AsRef<[u8]>>(key: Key) -> Self {
        let key = key.as_ref();
        let key = &key[..key.len().min(256)];

        let mut initial_state = [0_u8; 256];
        for (i, v) in initial_state.iter_mut().enumerate() {
            *v = i as u8;
        }
        if key.is_empty() {
            return Self { initial_state };
        }

        let mut j = 0_u8;
        for i in 0..256 {
            j = j.wrapping_add(initial_state[i]).wrapping_add(key[i % key.len()]);
            initial_state.swap(i, j as usize);
        }

        Self { initial_state }
    }

    /// XOR `input` with the key stream. RC4 is symmetric, so this both encrypts and decrypts.
    pub fn apply<Input: AsRef<[u8]>>(&self, input: Input) -> Vec<u8> {
        let mut state = self.initial_state;
        let (mut i, mut j) = (0_u8, 0_u8);

        input
            .as_ref()
            .iter()
            .map(|byte| {
                i = i.wrapping_add(1);
                j = j.wrapping_add(state[i as usize]);
                state.swap(i as usize, j as usize);
                byte ^ state[state[i as usize].wrapping_add(state[j as usize]) as usize]
            })
            .collect()
    }
}
