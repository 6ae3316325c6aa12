//! CSPRNG: ChaCha20-based generator with fast key erasure
//!
//! A generator is owned by whoever creates it (normally the client
//! configuration) and shared behind a lock. It is seeded either from an
//! explicit 32-byte seed or from the x86 RDRAND instruction; when no
//! hardware entropy is available construction fails instead of falling
//! back to a guessable source.

use spin::Mutex;
use zeroize::Zeroize;

use super::chacha20::{chacha20_core, SIGMA};
use super::CryptoError;

/// Source of cryptographically strong random bytes.
pub trait SecureRandom: Send + Sync {
    /// Fill `dest` entirely or fail.
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError>;
}

/// ChaCha20 keystream generator. After every request the key is replaced
/// with fresh keystream, so earlier output cannot be recomputed from a later
/// state.
pub struct ChaChaRng {
    inner: Mutex<RngState>,
}

struct RngState {
    state: [u32; 16],
}

impl Drop for RngState {
    fn drop(&mut self) {
        self.state.zeroize();
    }
}

impl RngState {
    fn new(seed: &[u8; 32]) -> Self {
        let mut state = [0u32; 16];
        state[..4].copy_from_slice(&SIGMA);
        let mut this = Self { state };
        this.rekey(seed);
        this
    }

    fn rekey(&mut self, key: &[u8]) {
        for (i, word) in key.chunks_exact(4).take(8).enumerate() {
            self.state[4 + i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }
        // counter and nonce restart with every key
        for word in self.state[12..].iter_mut() {
            *word = 0;
        }
    }

    fn next_block(&mut self) -> [u8; 64] {
        let block = chacha20_core(&self.state);
        self.state[12] = self.state[12].wrapping_add(1);
        if self.state[12] == 0 {
            self.state[13] = self.state[13].wrapping_add(1);
        }
        block
    }

    fn fill(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(64) {
            let mut block = self.next_block();
            chunk.copy_from_slice(&block[..chunk.len()]);
            block.zeroize();
        }
        let mut next_key = self.next_block();
        self.rekey(&next_key[..32]);
        next_key.zeroize();
    }
}

impl ChaChaRng {
    /// Deterministic generator from a caller-supplied seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let mut seed = seed;
        let rng = Self {
            inner: Mutex::new(RngState::new(&seed)),
        };
        seed.zeroize();
        rng
    }

    /// Generator seeded from the CPU's hardware random number generator.
    pub fn from_hardware() -> Result<Self, CryptoError> {
        let mut seed = [0u8; 32];
        for chunk in seed.chunks_exact_mut(4) {
            chunk.copy_from_slice(&hardware_u32()?.to_le_bytes());
        }
        let rng = Self::from_seed(seed);
        seed.zeroize();
        log::debug!("[KPIO TLS] CSPRNG seeded from RDRAND");
        Ok(rng)
    }
}

impl SecureRandom for ChaChaRng {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        self.inner.lock().fill(dest);
        Ok(())
    }
}

impl core::fmt::Debug for ChaChaRng {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ChaChaRng { .. }")
    }
}

// ── RDRAND wrapper ──────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
fn hardware_u32() -> Result<u32, CryptoError> {
    // CPUID.01H:ECX.RDRAND[bit 30]
    #[allow(unused_unsafe)]
    let leaf = unsafe { core::arch::x86_64::__cpuid(1) };
    if leaf.ecx & (1 << 30) == 0 {
        return Err(CryptoError::EntropyUnavailable);
    }
    // RDRAND may transiently fail; Intel recommends ten retries.
    for _ in 0..10 {
        let val: u32;
        let ok: u8;
        unsafe {
            core::arch::asm!(
                "rdrand {val:e}",
                "setc {ok}",
                val = out(reg) val,
                ok = out(reg_byte) ok,
                options(nomem, nostack),
            );
        }
        if ok != 0 {
            return Ok(val);
        }
    }
    Err(CryptoError::EntropyUnavailable)
}

#[cfg(not(target_arch = "x86_64"))]
fn hardware_u32() -> Result<u32, CryptoError> {
    Err(CryptoError::EntropyUnavailable)
}
